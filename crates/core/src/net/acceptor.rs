//! Connection acceptance.
//!
//! The acceptor thread owns the listening socket and loops on `accept`,
//! turning each new socket into a [`Client`] and handing it to the worker
//! pool. Failures between accept and handoff drop the socket; the acceptor
//! itself keeps running through anything short of shutdown.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::net::client::{Client, SocketKind, client_loop};
use crate::net::pool::WorkerPool;
use crate::registry::ClientRegistry;
use crate::server::ServerConfig;
use crate::vhost::VirtualHost;

/// Poll interval between accept attempts on the non-blocking listener,
/// also the bound on shutdown latency of the acceptor thread.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub(crate) struct Acceptor {
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    vhost: Arc<VirtualHost>,
    pool: Arc<WorkerPool>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
}

impl Acceptor {
    pub(crate) fn new(
        listener: TcpListener,
        registry: Arc<ClientRegistry>,
        vhost: Arc<VirtualHost>,
        pool: Arc<WorkerPool>,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            listener,
            registry,
            vhost,
            pool,
            config,
            running,
        }
    }

    /// Accept until the running flag drops.
    pub(crate) fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.accept_one(stream, peer_addr),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        }
        tracing::debug!("acceptor exited");
    }

    /// Steps for one incoming connection; any early return drops (and so
    /// closes) the accepted socket.
    fn accept_one(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "local address query failed");
                return;
            }
        };

        let kind = match socket_kind(&stream) {
            Some(kind) => kind,
            None => return,
        };

        tracing::info!(%peer_addr, ?kind, "incoming connection accepted");

        // Taken here, released exactly once by the client's teardown (or
        // below, if the client never makes it onto a worker).
        self.vhost.connection_opened();

        let client = match Client::new(
            stream,
            kind,
            peer_addr,
            local_addr,
            Arc::clone(&self.vhost),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        ) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "client setup failed");
                self.vhost.connection_closed();
                return;
            }
        };

        if self.pool.execute(move || client_loop(client)).is_err() {
            tracing::warn!(%peer_addr, "worker pool closed, dropping connection");
            self.vhost.connection_closed();
        }
    }
}

/// Transport protocol of an accepted socket.
///
/// Without SCTP support every connection is TCP by construction. With it,
/// the socket is asked for its protocol; unknown protocols are rejected.
#[cfg(not(feature = "sctp"))]
fn socket_kind(_stream: &TcpStream) -> Option<SocketKind> {
    Some(SocketKind::Tcp)
}

#[cfg(feature = "sctp")]
fn socket_kind(stream: &TcpStream) -> Option<SocketKind> {
    use std::os::fd::AsRawFd;

    let mut proto: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PROTOCOL,
            (&raw mut proto).cast(),
            &raw mut len,
        )
    };
    if rc != 0 {
        tracing::warn!(
            error = %std::io::Error::last_os_error(),
            "socket protocol query failed"
        );
        return None;
    }
    match proto {
        libc::IPPROTO_TCP => Some(SocketKind::Tcp),
        libc::IPPROTO_SCTP => Some(SocketKind::Sctp),
        other => {
            tracing::error!(protocol = other, "invalid socket protocol");
            None
        }
    }
}
