//! # rivulet — RTSP/RTP streaming server core
//!
//! The engine room of a streaming media server: a shared buffer queue that
//! fans demuxed packets out to any number of lagging readers, and the
//! client machinery that accepts RTSP connections, runs one event loop per
//! client on a bounded worker pool, and polices stream liveness.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request framing, response serialization, session lifecycle hooks |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Sender Report + BYE compound sent on soft stream timeout |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Server         — orchestrator, shutdown      │
//! │  ClientRegistry — live clients, broadcast     │
//! ├───────────────────────────────────────────────┤
//! │  net::acceptor  — accept, classify, hand off  │
//! │  net::pool      — worker per client loop      │
//! │  net::client    — per-client event loop       │
//! ├───────────────────────────────────────────────┤
//! │  session        — RTP sessions, liveness      │
//! │  rtcp           — SR + BYE serialization      │
//! │  protocol       — RTSP parsing, responses     │
//! ├───────────────────────────────────────────────┤
//! │  queue          — one-producer/N-consumer FIFO│
//! │  media          — resources, tracks, packets  │
//! │  demuxer        — container parser seam       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Packets flow demuxer → track queue → per-session consumer → UDP; the
//! control plane flows acceptor → worker pool → client loop. The queue
//! retains each packet until the slowest attached session has passed it.
//!
//! ## Quick start
//!
//! ```no_run
//! use rivulet::Server;
//!
//! let mut server = Server::new("0.0.0.0:8554").unwrap();
//! server.start().unwrap();
//! // ... serve ...
//! server.shutdown();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — [`Server`] orchestrator and [`ServerConfig`].
//! - [`queue`] — [`Producer`]/[`Consumer`] shared media buffer queue.
//! - [`registry`] — [`ClientRegistry`] of live clients.
//! - [`net`] — acceptor, worker pool, per-client loop.
//! - [`session`] — RTP sessions and the liveness checker.
//! - [`rtcp`] — Sender Report and BYE serialization.
//! - [`protocol`] — RTSP request/response framing and the handler seam.
//! - [`media`] — [`Resource`], [`Track`], [`MediaPacket`].
//! - [`demuxer`] — the [`Demuxer`] trait and registry.
//! - [`vhost`] — [`VirtualHost`] connection accounting.
//! - [`error`] — [`ServerError`] and [`Result`].

pub mod demuxer;
pub mod error;
pub mod media;
pub mod net;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod rtcp;
pub mod server;
pub mod session;
pub mod vhost;

pub use demuxer::{Demuxer, DemuxerError, DemuxerInfo, DemuxerRegistry};
pub use error::{Result, ServerError};
pub use media::{InputStream, MediaPacket, Resource, SourceKind, Track};
pub use net::client::{Client, ClientHandle, SocketKind, TunnelPair};
pub use queue::{Consumer, Producer};
pub use registry::ClientRegistry;
pub use server::{Server, ServerConfig};
pub use session::{ClientSession, RtpSession, SessionTransport};
pub use vhost::VirtualHost;
