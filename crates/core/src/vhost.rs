//! Virtual hosts: the configuration bucket a client is assigned to.
//!
//! The acceptor bumps the connection count before a client is handed to the
//! worker pool; the client loop decrements it exactly once during teardown,
//! whether or not the loop ever ran.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A server-side host bucket tracking its live connection count.
#[derive(Debug)]
pub struct VirtualHost {
    name: String,
    connection_count: AtomicUsize,
}

impl VirtualHost {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connection_count: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Account for an accepted connection.
    pub fn connection_opened(&self) {
        let count = self.connection_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(vhost = %self.name, connections = count, "connection opened");
    }

    /// Account for a torn-down connection.
    pub fn connection_closed(&self) {
        let count = self.connection_count.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(vhost = %self.name, connections = count, "connection closed");
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tracks_open_close() {
        let vhost = VirtualHost::new("default");
        assert_eq!(vhost.connection_count(), 0);
        vhost.connection_opened();
        vhost.connection_opened();
        assert_eq!(vhost.connection_count(), 2);
        vhost.connection_closed();
        assert_eq!(vhost.connection_count(), 1);
    }
}
