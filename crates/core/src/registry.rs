//! Process-wide list of live clients.
//!
//! The registry is owned by the [`Server`](crate::Server) and shared by
//! `Arc` with the acceptor and every client loop. A client registers itself
//! when its loop starts running and unregisters on the way out; shutdown
//! walks the list and asks every client to disconnect.
//!
//! One plain mutex guards the whole list. Registration churn is low (one
//! lock per connection lifetime plus shutdown), so a reader/writer lock
//! buys nothing here.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::net::client::ClientHandle;

/// Registry of clients whose loops are currently running.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<Vec<Arc<ClientHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Add a client. Called by the client loop once its watchers are set up.
    pub fn register(&self, handle: Arc<ClientHandle>) {
        let mut clients = self.clients.lock();
        clients.push(handle);
        tracing::debug!(clients = clients.len(), "client registered");
    }

    /// Remove a client by identity. Order is not significant, so the removal
    /// swaps with the last entry.
    pub fn unregister(&self, handle: &Arc<ClientHandle>) {
        let mut clients = self.clients.lock();
        if let Some(pos) = clients.iter().position(|c| Arc::ptr_eq(c, handle)) {
            clients.swap_remove(pos);
            tracing::debug!(clients = clients.len(), "client unregistered");
        }
    }

    /// Run `f` for every registered client. The lock is held for the whole
    /// iteration: a concurrent register or unregister either fully precedes
    /// or fully follows it.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<ClientHandle>)) {
        let clients = self.clients.lock();
        for client in clients.iter() {
            f(client);
        }
    }

    /// Shutdown broadcast: request disconnection from every registered
    /// client. Each loop exits at its next iteration.
    pub fn disconnect_all(&self) {
        let mut kicked = 0usize;
        self.for_each(|client| {
            client.request_disconnect();
            kicked += 1;
        });
        tracing::info!(kicked, "disconnect broadcast");
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}
