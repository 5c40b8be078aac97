//! Per-client RTP sessions and stream liveness checking.
//!
//! Each RTP session couples a buffer-queue consumer on one track with the
//! UDP transport negotiated for the client, and remembers when it last put
//! a datagram on the wire. The client loop's periodic timer walks the
//! sessions through [`check_liveness`]: a live source quiet for
//! [`LIVE_STREAM_BYE_TIMEOUT`] gets an RTCP BYE as a soft notice, and any
//! session quiet for [`STREAM_TIMEOUT`] gets its client disconnected.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngExt;

use crate::media::{MediaPacket, SourceKind, Track};
use crate::net::client::ClientHandle;
use crate::queue::Consumer;
use crate::rtcp::{self, SenderReport};

/// Idle threshold after which a live-source session is sent an RTCP BYE.
pub const LIVE_STREAM_BYE_TIMEOUT: Duration = Duration::from_secs(6);

/// Idle threshold after which the client is kicked. Must stay an integer
/// multiple of [`LIVE_STREAM_BYE_TIMEOUT`] so the BYE goes out first; the
/// margin also gives players room to retry over another transport.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(12);

/// Negotiated UDP endpoints for one session's RTP and RTCP flows.
pub struct SessionTransport {
    socket: Arc<UdpSocket>,
    pub rtp_addr: SocketAddr,
    pub rtcp_addr: SocketAddr,
}

impl SessionTransport {
    pub fn new(socket: Arc<UdpSocket>, rtp_addr: SocketAddr, rtcp_addr: SocketAddr) -> Self {
        Self {
            socket,
            rtp_addr,
            rtcp_addr,
        }
    }
}

/// One media flow from a track to a client.
pub struct RtpSession {
    ssrc: u32,
    client: Arc<ClientHandle>,
    track: Arc<Track>,
    consumer: Consumer<MediaPacket>,
    transport: SessionTransport,
    last_packet_send_time: Mutex<Instant>,
    last_rtp_timestamp: AtomicU32,
    packet_count: AtomicU32,
    octet_count: AtomicU32,
}

impl RtpSession {
    /// Subscribe to `track` and start the idle clock at "now".
    pub fn new(client: Arc<ClientHandle>, track: Arc<Track>, transport: SessionTransport) -> Self {
        let consumer = track.subscribe();
        Self {
            ssrc: rand::rng().random::<u32>(),
            client,
            track,
            consumer,
            transport,
            last_packet_send_time: Mutex::new(Instant::now()),
            last_rtp_timestamp: AtomicU32::new(0),
            packet_count: AtomicU32::new(0),
            octet_count: AtomicU32::new(0),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn client(&self) -> &Arc<ClientHandle> {
        &self.client
    }

    pub fn source(&self) -> SourceKind {
        self.track.source()
    }

    /// Send every packet currently queued for this session and advance the
    /// consumer past them. Returns how many datagrams went out.
    pub fn deliver_ready(&mut self) -> std::io::Result<usize> {
        let mut sent = 0usize;
        while let Some(packet) = self.consumer.get() {
            self.transport
                .socket
                .send_to(&packet.data, self.transport.rtp_addr)?;
            self.packet_count.fetch_add(1, Ordering::Relaxed);
            self.octet_count
                .fetch_add(packet.data.len() as u32, Ordering::Relaxed);
            self.last_rtp_timestamp
                .store(packet.timestamp, Ordering::Relaxed);
            self.consumer.advance();
            sent += 1;
        }
        if sent > 0 {
            *self.last_packet_send_time.lock() = Instant::now();
            tracing::trace!(ssrc = self.ssrc, sent, "delivered RTP packets");
        }
        Ok(sent)
    }

    /// Packets queued but not yet delivered.
    pub fn backlog(&self) -> usize {
        self.consumer.unseen()
    }

    /// How long this session has been idle as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_packet_send_time.lock())
    }

    /// Reset the idle clock (e.g. when delivery is paused on purpose).
    pub fn mark_sent(&self) {
        *self.last_packet_send_time.lock() = Instant::now();
    }

    /// Send the soft-timeout notice: an RTCP Sender Report + BYE compound
    /// to the session's RTCP endpoint.
    pub fn send_bye(&self) -> std::io::Result<()> {
        let report = SenderReport {
            ssrc: self.ssrc,
            ntp_timestamp: rtcp::ntp_now(),
            rtp_timestamp: self.last_rtp_timestamp.load(Ordering::Relaxed),
            packet_count: self.packet_count.load(Ordering::Relaxed),
            octet_count: self.octet_count.load(Ordering::Relaxed),
        };
        let compound = rtcp::sender_report_bye(&report);
        self.transport
            .socket
            .send_to(&compound, self.transport.rtcp_addr)?;
        Ok(())
    }
}

/// The RTSP-session state a client carries: its RTP sessions.
#[derive(Default)]
pub struct ClientSession {
    pub rtp_sessions: Vec<RtpSession>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            rtp_sessions: Vec::new(),
        }
    }

    pub fn add(&mut self, session: RtpSession) {
        self.rtp_sessions.push(session);
    }
}

/// Periodic liveness sweep over a client's sessions.
///
/// A session can match both thresholds in one sweep; the BYE still goes
/// out before the disconnect request, so a client that lingered past the
/// hard limit is notified on its way out.
pub fn check_liveness(
    sessions: &[RtpSession],
    bye_timeout: Duration,
    stream_timeout: Duration,
    now: Instant,
) {
    for session in sessions {
        let idle = session.idle_for(now);

        // No data for a while from a live producer: tell the client the
        // source is quiet before considering the kick.
        if session.source() == SourceKind::Live && idle >= bye_timeout {
            tracing::info!(ssrc = session.ssrc(), ?idle, "soft stream timeout");
            if let Err(e) = session.send_bye() {
                tracing::warn!(ssrc = session.ssrc(), error = %e, "failed to send BYE");
            }
        }

        // The client ignored the BYE (or a stored stream stalled): kick it.
        if idle >= stream_timeout {
            tracing::info!(ssrc = session.ssrc(), ?idle, "stream timeout, client kicked");
            session.client().request_disconnect();
        }
    }
}
