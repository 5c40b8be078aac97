//! Per-client state and event loop.
//!
//! Every accepted connection becomes a [`Client`] owned by one worker
//! thread for its whole lifetime. The worker runs [`client_loop`]: service
//! readable bytes into the request parser, flush the outbound queue, push
//! due RTP packets, and fire the liveness sweep once per timeout period —
//! until the peer goes away or someone asks the client to disconnect.
//!
//! Cross-thread interaction is deliberately narrow: other threads hold an
//! [`ClientHandle`] and may only request disconnection (picked up at the
//! next loop iteration) or, during paired-tunnel teardown, close the
//! socket. Everything else on the client is touched by its own worker only.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::protocol::{
    self, MinimalHandler, ParseOutcome, PendingRequest, RequestHandler, RtspRequest,
};
use crate::registry::ClientRegistry;
use crate::server::ServerConfig;
use crate::session::{self, ClientSession};
use crate::vhost::VirtualHost;

/// How long the loop sleeps when nothing is readable, writable or due.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 4096;

/// Transport protocol of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Sctp,
}

/// The shareable face of a client.
///
/// The registry, the liveness checker and tunnel peers hold this; the
/// owning [`Client`] keeps the rest to itself.
pub struct ClientHandle {
    kind: SocketKind,
    peer_addr: SocketAddr,
    /// Clone of the client's stream, kept so paired teardown can close the
    /// socket of a half whose loop is not running.
    stream: Mutex<Option<TcpStream>>,
    disconnect: AtomicBool,
    closed: AtomicBool,
}

impl ClientHandle {
    fn new(kind: SocketKind, peer_addr: SocketAddr, stream: TcpStream) -> Arc<Self> {
        Arc::new(Self {
            kind,
            peer_addr,
            stream: Mutex::new(Some(stream)),
            disconnect: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Ask the owning loop to exit at its next iteration. Safe from any
    /// thread; this is the only cancellation there is.
    pub fn request_disconnect(&self) {
        self.disconnect.store(true, Ordering::SeqCst);
    }

    pub fn is_disconnect_requested(&self) -> bool {
        self.disconnect.load(Ordering::SeqCst)
    }

    /// Shut the socket down and mark the client freed. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handle with no socket behind it, for exercising registry and
    /// liveness logic without a connection.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        Arc::new(Self {
            kind: SocketKind::Tcp,
            peer_addr: "127.0.0.1:0".parse().unwrap(),
            stream: Mutex::new(None),
            disconnect: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

/// The two halves of an RTSP-over-HTTP tunnel (a GET and a POST
/// connection forming one logical session).
///
/// Both clients reference the same pair object; the handles inside are
/// weak so the pair never keeps a dead half alive. Teardown resolves the
/// cycle: the RTSP half frees both, the HTTP half only itself.
#[derive(Default)]
pub struct TunnelPair {
    rtsp_client: Mutex<Weak<ClientHandle>>,
    http_client: Mutex<Weak<ClientHandle>>,
}

impl TunnelPair {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_rtsp_half(&self, handle: &Arc<ClientHandle>) {
        *self.rtsp_client.lock() = Arc::downgrade(handle);
    }

    pub fn set_http_half(&self, handle: &Arc<ClientHandle>) {
        *self.http_client.lock() = Arc::downgrade(handle);
    }

    pub fn rtsp_half(&self) -> Option<Arc<ClientHandle>> {
        self.rtsp_client.lock().upgrade()
    }

    pub fn http_half(&self) -> Option<Arc<ClientHandle>> {
        self.http_client.lock().upgrade()
    }

    fn is_rtsp_half(&self, handle: &Arc<ClientHandle>) -> bool {
        self.rtsp_half()
            .is_some_and(|rtsp| Arc::ptr_eq(&rtsp, handle))
    }
}

enum ReadState {
    Open,
    PeerClosed,
}

/// One connected client, owned by its worker thread.
pub struct Client {
    stream: TcpStream,
    handle: Arc<ClientHandle>,
    local_addr: SocketAddr,
    vhost: Arc<VirtualHost>,
    registry: Arc<ClientRegistry>,
    config: Arc<ServerConfig>,
    handler: Box<dyn RequestHandler>,
    /// Raw inbound bytes not yet parsed into a request.
    input: Vec<u8>,
    /// Serialized responses waiting for the socket to accept them. Only
    /// meaningful for TCP; SCTP sends are direct.
    out_queue: VecDeque<Vec<u8>>,
    /// A request whose head is parsed but whose body is still arriving.
    pending_request: Option<PendingRequest>,
    /// RTSP session state, present once SETUP has run.
    pub session: Option<ClientSession>,
    pair: Option<Arc<TunnelPair>>,
}

impl Client {
    pub(crate) fn new(
        stream: TcpStream,
        kind: SocketKind,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        vhost: Arc<VirtualHost>,
        registry: Arc<ClientRegistry>,
        config: Arc<ServerConfig>,
    ) -> io::Result<Self> {
        let handle = ClientHandle::new(kind, peer_addr, stream.try_clone()?);
        Ok(Self {
            stream,
            handle,
            local_addr,
            vhost,
            registry,
            config,
            handler: Box::new(MinimalHandler),
            input: Vec::new(),
            out_queue: VecDeque::new(),
            pending_request: None,
            session: None,
            pair: None,
        })
    }

    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Replace the default request handler (the full method state machine
    /// plugs in here).
    pub fn set_handler(&mut self, handler: Box<dyn RequestHandler>) {
        self.handler = handler;
    }

    /// Attach this client to a tunnel pair.
    pub fn set_pair(&mut self, pair: Arc<TunnelPair>) {
        self.pair = Some(pair);
    }

    /// Queue bytes for the peer. On TCP they go to the outbound queue and
    /// drain as the socket allows; on SCTP the message is sent directly.
    pub fn write_data(&mut self, data: Vec<u8>) {
        match self.handle.kind() {
            SocketKind::Tcp => self.out_queue.push_back(data),
            SocketKind::Sctp => {
                if let Err(e) = self.stream.write_all(&data) {
                    tracing::warn!(peer = %self.handle.peer_addr(), error = %e, "direct send failed");
                }
            }
        }
    }

    /// Watcher setup. The one failure mode that matters in practice is FD
    /// exhaustion surfacing from fcntl here.
    fn init_watchers(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(true)
    }

    fn run(&mut self) -> &'static str {
        let mut liveness_deadline = Instant::now() + self.config.stream_timeout;

        loop {
            if self.handle.is_disconnect_requested() {
                return "disconnect requested";
            }

            match self.service_read() {
                Ok(ReadState::Open) => {}
                Ok(ReadState::PeerClosed) => return "connection closed by client",
                Err(e) => {
                    tracing::debug!(peer = %self.handle.peer_addr(), error = %e, "read failed");
                    return "read error";
                }
            }

            if let Err(e) = self.dispatch_buffered() {
                tracing::warn!(peer = %self.handle.peer_addr(), error = %e, "dropping client");
                return "protocol error";
            }

            if let Err(e) = self.deliver_sessions() {
                tracing::debug!(peer = %self.handle.peer_addr(), error = %e, "RTP delivery failed");
                return "delivery error";
            }

            if let Err(e) = self.flush_out_queue() {
                tracing::debug!(peer = %self.handle.peer_addr(), error = %e, "write failed");
                return "write error";
            }

            let now = Instant::now();
            if now >= liveness_deadline {
                self.check_liveness(now);
                liveness_deadline = now + self.config.stream_timeout;
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Pull whatever the socket has into the input buffer.
    fn service_read(&mut self) -> io::Result<ReadState> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadState::PeerClosed),
                Ok(n) => {
                    self.input.extend_from_slice(&chunk[..n]);
                    if n < READ_CHUNK {
                        return Ok(ReadState::Open);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadState::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Parse and dispatch every complete request sitting in the buffer,
    /// parking at most one request whose body is still in flight.
    fn dispatch_buffered(&mut self) -> crate::error::Result<()> {
        loop {
            if let Some(mut pending) = self.pending_request.take() {
                let taken = pending.feed(&self.input);
                self.input.drain(..taken);
                if pending.is_complete() {
                    let request = pending.into_request();
                    self.dispatch(&request);
                } else {
                    self.pending_request = Some(pending);
                    return Ok(());
                }
            }

            match protocol::parse_request(&self.input)? {
                ParseOutcome::Complete { request, consumed } => {
                    self.input.drain(..consumed);
                    let pending = PendingRequest::new(request);
                    if pending.is_complete() {
                        let request = pending.into_request();
                        self.dispatch(&request);
                    } else {
                        self.pending_request = Some(pending);
                    }
                }
                ParseOutcome::Incomplete => return Ok(()),
            }
        }
    }

    fn dispatch(&mut self, request: &RtspRequest) {
        tracing::debug!(
            peer = %self.handle.peer_addr(),
            method = %request.method,
            uri = %request.uri,
            "request"
        );
        let response = self.handler.handle(request, self.handle.peer_addr());
        tracing::debug!(
            peer = %self.handle.peer_addr(),
            status = response.status_code,
            "response"
        );
        self.write_data(response.serialize().into_bytes());
    }

    /// Push due RTP packets for every session.
    fn deliver_sessions(&mut self) -> io::Result<()> {
        if let Some(session) = self.session.as_mut() {
            for rtp in &mut session.rtp_sessions {
                rtp.deliver_ready()?;
            }
        }
        Ok(())
    }

    /// Drain the outbound queue as far as the socket accepts.
    fn flush_out_queue(&mut self) -> io::Result<()> {
        while let Some(front) = self.out_queue.front_mut() {
            match self.stream.write(front) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ));
                }
                Ok(n) if n == front.len() => {
                    self.out_queue.pop_front();
                }
                Ok(n) => {
                    // Socket full mid-buffer; keep the remainder queued.
                    front.drain(..n);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn check_liveness(&self, now: Instant) {
        if let Some(session) = &self.session {
            session::check_liveness(
                &session.rtp_sessions,
                self.config.live_stream_bye_timeout,
                self.config.stream_timeout,
                now,
            );
        }
    }

    /// Post-loop cleanup. Runs whether or not the run phase happened.
    fn teardown(self) {
        // The count was taken in the acceptor before anything could fail;
        // release it exactly once here.
        self.vhost.connection_closed();

        match self.pair.clone() {
            None => self.free(),
            Some(pair) if pair.is_rtsp_half(&self.handle) => {
                // RTSP half going away ends the whole tunnel.
                if let Some(http_half) = pair.http_half() {
                    http_half.close();
                    tracing::info!(peer = %http_half.peer_addr(), "tunnel peer removed");
                }
                self.free();
            }
            // HTTP half: the RTSP half cleans up for both when its own
            // loop exits.
            Some(_) => self.free(),
        }
    }

    fn free(self) {
        self.handle.close();
        tracing::info!(peer = %self.handle.peer_addr(), "client removed");
        // Session state, buffers and the stream drop here; every queue
        // consumer detaches so slow-reader backlogs are released.
    }
}

/// Worker-pool entry point for one client.
pub fn client_loop(mut client: Client) {
    let peer_addr = client.handle.peer_addr();

    // If watcher setup failed (FD exhaustion and friends) there is nothing
    // useful to tell the peer; skip the run phase and clean up.
    match client.init_watchers() {
        Err(e) => {
            tracing::error!(%peer_addr, error = %e, "client loop setup failed, dropping connection");
        }
        Ok(()) => {
            let registry = Arc::clone(&client.registry);
            registry.register(Arc::clone(&client.handle));

            let reason = client.run();

            registry.unregister(&client.handle);
            tracing::info!(%peer_addr, reason, "client disconnected");
        }
    }

    client.teardown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let outbound = TcpStream::connect(addr).unwrap();
        let (inbound, _) = listener.accept().unwrap();
        (inbound, outbound)
    }

    fn test_client(vhost: &Arc<VirtualHost>, registry: &Arc<ClientRegistry>) -> (Client, TcpStream) {
        let (stream, peer_side) = connected_pair();
        let peer_addr = stream.peer_addr().unwrap();
        let local_addr = stream.local_addr().unwrap();
        vhost.connection_opened();
        let client = Client::new(
            stream,
            SocketKind::Tcp,
            peer_addr,
            local_addr,
            Arc::clone(vhost),
            Arc::clone(registry),
            Arc::new(ServerConfig::default()),
        )
        .unwrap();
        (client, peer_side)
    }

    #[test]
    fn request_response_through_buffers() {
        let vhost = Arc::new(VirtualHost::new("default"));
        let registry = Arc::new(ClientRegistry::new());
        let (mut client, mut peer) = test_client(&vhost, &registry);

        client
            .input
            .extend_from_slice(b"OPTIONS * RTSP/1.0\r\nCSeq: 7\r\n\r\n");
        client.dispatch_buffered().unwrap();
        assert_eq!(client.out_queue.len(), 1);

        client.flush_out_queue().unwrap();
        assert!(client.out_queue.is_empty());

        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut response = Vec::new();
        let mut buf = [0u8; 256];
        while !response.ends_with(b"\r\n\r\n") {
            let n = peer.read(&mut buf).unwrap();
            assert_ne!(n, 0, "peer closed before full response");
            response.extend_from_slice(&buf[..n]);
        }
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(response.contains("CSeq: 7\r\n"));
    }

    #[test]
    fn partial_request_parks_until_body_arrives() {
        let vhost = Arc::new(VirtualHost::new("default"));
        let registry = Arc::new(ClientRegistry::new());
        let (mut client, _peer) = test_client(&vhost, &registry);

        client.input.extend_from_slice(
            b"SET_PARAMETER rtsp://h/s RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 4\r\n\r\nab",
        );
        client.dispatch_buffered().unwrap();
        assert!(client.pending_request.is_some());
        assert!(client.out_queue.is_empty());

        client.input.extend_from_slice(b"cd");
        client.dispatch_buffered().unwrap();
        assert!(client.pending_request.is_none());
        assert_eq!(client.out_queue.len(), 1);
    }

    #[test]
    fn disconnect_request_exits_loop_and_unregisters() {
        let vhost = Arc::new(VirtualHost::new("default"));
        let registry = Arc::new(ClientRegistry::new());
        let (client, _peer) = test_client(&vhost, &registry);
        let handle = Arc::clone(client.handle());

        let worker = thread::spawn(move || client_loop(client));

        // The loop registers itself, then notices the flag and tears down.
        while registry.is_empty() && !handle.is_closed() {
            thread::sleep(Duration::from_millis(5));
        }
        handle.request_disconnect();
        worker.join().unwrap();

        assert!(registry.is_empty());
        assert!(handle.is_closed());
        assert_eq!(vhost.connection_count(), 0);
    }

    #[test]
    fn rtsp_half_teardown_frees_both_tunnel_halves() {
        let vhost = Arc::new(VirtualHost::new("default"));
        let registry = Arc::new(ClientRegistry::new());
        let (mut rtsp, _rtsp_peer) = test_client(&vhost, &registry);
        let (mut http, _http_peer) = test_client(&vhost, &registry);

        let pair = TunnelPair::new();
        pair.set_rtsp_half(rtsp.handle());
        pair.set_http_half(http.handle());
        rtsp.set_pair(Arc::clone(&pair));
        http.set_pair(Arc::clone(&pair));

        let http_handle = Arc::clone(http.handle());
        let rtsp_handle = Arc::clone(rtsp.handle());

        rtsp.teardown();
        assert!(rtsp_handle.is_closed());
        assert!(http_handle.is_closed(), "RTSP half frees the HTTP half too");
        drop(http);
    }

    #[test]
    fn http_half_teardown_frees_only_itself() {
        let vhost = Arc::new(VirtualHost::new("default"));
        let registry = Arc::new(ClientRegistry::new());
        let (mut rtsp, _rtsp_peer) = test_client(&vhost, &registry);
        let (mut http, _http_peer) = test_client(&vhost, &registry);

        let pair = TunnelPair::new();
        pair.set_rtsp_half(rtsp.handle());
        pair.set_http_half(http.handle());
        rtsp.set_pair(Arc::clone(&pair));
        http.set_pair(Arc::clone(&pair));

        let http_handle = Arc::clone(http.handle());
        let rtsp_handle = Arc::clone(rtsp.handle());

        http.teardown();
        assert!(http_handle.is_closed());
        assert!(!rtsp_handle.is_closed(), "RTSP half frees itself later");
        drop(rtsp);
    }

    #[test]
    fn vhost_count_released_exactly_once_per_teardown() {
        let vhost = Arc::new(VirtualHost::new("default"));
        let registry = Arc::new(ClientRegistry::new());
        let (client, _peer) = test_client(&vhost, &registry);
        assert_eq!(vhost.connection_count(), 1);
        client.teardown();
        assert_eq!(vhost.connection_count(), 0);
    }
}
