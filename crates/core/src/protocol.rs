//! RTSP message parsing and serialization.
//!
//! The client loop buffers raw bytes off the socket, so parsing here is
//! incremental: [`parse_request`] consumes a complete head (request line +
//! headers + blank line) when one is buffered and reports [`Incomplete`]
//! otherwise. A request whose body has not fully arrived yet is parked in
//! the client's pending-request slot as a [`PendingRequest`] until the
//! remaining bytes show up.
//!
//! [`Incomplete`]: ParseOutcome::Incomplete

use std::net::SocketAddr;

use crate::error::{ParseErrorKind, Result, ServerError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
    /// Message body, filled in once `Content-Length` bytes have arrived.
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq header, which numbers RTSP request/response pairs
    /// (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Declared body length, zero when absent or malformed.
    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Result of feeding buffered bytes to [`parse_request`].
#[derive(Debug)]
pub enum ParseOutcome {
    /// A complete head was parsed; `consumed` bytes (through the blank
    /// line) should be drained from the input buffer. The body, if the
    /// request declares one, is collected separately.
    Complete {
        request: RtspRequest,
        consumed: usize,
    },
    /// No blank line yet; keep buffering.
    Incomplete,
}

/// A request whose head is parsed but whose body is still in flight.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: RtspRequest,
    remaining: usize,
}

impl PendingRequest {
    pub fn new(request: RtspRequest) -> Self {
        let remaining = request.content_length();
        Self { request, remaining }
    }

    /// Move body bytes from `input` into the request. Returns the number
    /// of bytes taken; the request is complete when [`is_complete`] holds.
    ///
    /// [`is_complete`]: Self::is_complete
    pub fn feed(&mut self, input: &[u8]) -> usize {
        let take = self.remaining.min(input.len());
        self.request.body.extend_from_slice(&input[..take]);
        self.remaining -= take;
        take
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    pub fn into_request(self) -> RtspRequest {
        self.request
    }
}

/// Try to parse one request head out of the buffered input.
///
/// Malformed heads are an error; the caller drops the connection rather
/// than guessing at framing.
pub fn parse_request(input: &[u8]) -> Result<ParseOutcome> {
    let Some(head_len) = find_head_end(input) else {
        return Ok(ParseOutcome::Incomplete);
    };

    let head = String::from_utf8_lossy(&input[..head_len]);
    let mut lines = head.split("\r\n");

    let request_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or(ServerError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(ServerError::Parse {
            kind: ParseErrorKind::InvalidRequestLine,
        });
    }

    let method = parts[0].to_string();
    let uri = parts[1].to_string();
    let version = parts[2].to_string();

    if version != "RTSP/1.0" {
        tracing::warn!(version, "client sent non-RTSP/1.0 version");
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let colon_pos = line.find(':').ok_or(ServerError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;
        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();
        headers.push((name, value));
    }

    Ok(ParseOutcome::Complete {
        request: RtspRequest {
            method,
            uri,
            version,
            headers,
            body: Vec::new(),
        },
        // The head plus the terminating blank line.
        consumed: head_len + 4,
    })
}

/// Offset of the `\r\n\r\n` head terminator, if buffered.
fn find_head_end(input: &[u8]) -> Option<usize> {
    input.windows(4).position(|w| w == b"\r\n\r\n")
}

/// An RTSP response (RFC 2326 §7), built by chaining and serialized to the
/// text wire format. `Content-Length` is computed when a body is present.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every response (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = "rivulet/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 400 Bad Request — malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 501 Not Implemented — method outside the supported set.
    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}

/// The seam where RTSP method semantics plug into the client loop.
///
/// The loop parses framing and hands complete requests here; the handler
/// returns the response to queue on the client's outbound path. Session
/// state machines, SDP generation and the rest of the method surface live
/// behind this trait.
pub trait RequestHandler: Send {
    fn handle(&mut self, request: &RtspRequest, peer_addr: SocketAddr) -> RtspResponse;
}

/// Fallback handler: answers OPTIONS, rejects everything else.
#[derive(Default)]
pub struct MinimalHandler;

impl RequestHandler for MinimalHandler {
    fn handle(&mut self, request: &RtspRequest, peer_addr: SocketAddr) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");
        match request.method.as_str() {
            "OPTIONS" => {
                tracing::debug!(%peer_addr, %cseq, "OPTIONS");
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Public", "OPTIONS")
            }
            method => {
                tracing::warn!(%peer_addr, method, %cseq, "unsupported RTSP method");
                RtspResponse::not_implemented().add_header("CSeq", cseq)
            }
        }
    }
}
