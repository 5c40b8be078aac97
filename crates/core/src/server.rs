use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, ServerError};
use crate::net::acceptor::Acceptor;
use crate::net::pool::WorkerPool;
use crate::registry::ClientRegistry;
use crate::session;
use crate::vhost::VirtualHost;

/// Server-level tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the default virtual host clients are assigned to.
    pub vhost_name: String,
    /// Worker threads in the client pool, i.e. the bound on concurrently
    /// served clients.
    pub worker_threads: usize,
    /// Idle time before a live-source session gets an RTCP BYE.
    pub live_stream_bye_timeout: Duration,
    /// Idle time before a session's client is kicked, and the period of
    /// each client's liveness timer. Must be a positive integer multiple
    /// of `live_stream_bye_timeout`.
    pub stream_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            vhost_name: "default".to_string(),
            worker_threads: 16,
            live_stream_bye_timeout: session::LIVE_STREAM_BYE_TIMEOUT,
            stream_timeout: session::STREAM_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Reject timeout combinations where the BYE could never precede the
    /// hard kick.
    pub fn validate(&self) -> Result<()> {
        let bye = self.live_stream_bye_timeout;
        let hard = self.stream_timeout;
        if bye.is_zero() || hard.is_zero() || hard.as_nanos() % bye.as_nanos() != 0 {
            return Err(ServerError::InvalidTimeouts {
                stream_timeout: hard,
                bye_timeout: bye,
            });
        }
        Ok(())
    }
}

/// The streaming server: listener, worker pool, client registry, and the
/// default virtual host, with an orderly shutdown path.
///
/// `start` binds the listening socket and spawns the acceptor thread;
/// every accepted connection runs its own loop on a pool worker.
/// `shutdown` stops accepting, broadcasts a disconnect request to every
/// registered client, and joins the pool — after it returns, no client
/// thread is running.
pub struct Server {
    config: Arc<ServerConfig>,
    registry: Arc<ClientRegistry>,
    vhost: Arc<VirtualHost>,
    pool: Arc<WorkerPool>,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Result<Self> {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        Ok(Self {
            registry: Arc::new(ClientRegistry::new()),
            vhost: Arc::new(VirtualHost::new(&config.vhost_name)),
            pool,
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            acceptor: None,
            config: Arc::new(config),
        })
    }

    /// Bind the listener and start accepting connections.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);

        self.running.store(true, Ordering::SeqCst);

        let acceptor = Acceptor::new(
            listener,
            Arc::clone(&self.registry),
            Arc::clone(&self.vhost),
            Arc::clone(&self.pool),
            Arc::clone(&self.config),
            Arc::clone(&self.running),
        );
        self.acceptor = Some(
            thread::Builder::new()
                .name("rtsp-acceptor".to_string())
                .spawn(move || acceptor.run())?,
        );

        tracing::info!(addr = %self.bind_addr, "RTSP server listening");
        Ok(())
    }

    /// Stop accepting, disconnect every client, and wait for their loops
    /// to finish. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("server shutting down");

        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }

        // Every registered client exits at its next loop iteration; the
        // pool join then waits out their teardowns.
        self.registry.disconnect_all();
        self.pool.shutdown();

        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Actual bound address, available once started (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn vhost(&self) -> &Arc<VirtualHost> {
        &self.vhost
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn timeouts_must_nest() {
        let mut config = ServerConfig::default();
        config.live_stream_bye_timeout = Duration::from_secs(5);
        config.stream_timeout = Duration::from_secs(12);
        assert!(matches!(
            config.validate(),
            Err(ServerError::InvalidTimeouts { .. })
        ));

        config.live_stream_bye_timeout = Duration::from_secs(1);
        config.stream_timeout = Duration::from_secs(2);
        config.validate().unwrap();

        config.live_stream_bye_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn start_twice_is_an_error() {
        let mut server = Server::new("127.0.0.1:0").unwrap();
        server.start().unwrap();
        assert!(matches!(server.start(), Err(ServerError::AlreadyRunning)));
        server.shutdown();
        assert!(!server.is_running());
    }
}
