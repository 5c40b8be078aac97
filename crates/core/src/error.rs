//! Error types for the streaming server core.

use std::fmt;
use std::time::Duration;

/// Errors that can occur in the server core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning),
///   [`InvalidTimeouts`](Self::InvalidTimeouts).
/// - **Workers**: [`PoolClosed`](Self::PoolClosed).
///
/// Per-client I/O errors never cross the client loop; they end that client's
/// loop and are logged there. This enum covers the failures that surface to
/// callers of the library API.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The hard stream timeout is not a positive integer multiple of the
    /// soft BYE timeout, so the BYE could never precede the kick.
    #[error("stream_timeout {stream_timeout:?} must be a positive multiple of live_stream_bye_timeout {bye_timeout:?}")]
    InvalidTimeouts {
        stream_timeout: Duration,
        bye_timeout: Duration,
    },

    /// A job was submitted after the worker pool shut down.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, ServerError>`.
pub type Result<T> = std::result::Result<T, ServerError>;
