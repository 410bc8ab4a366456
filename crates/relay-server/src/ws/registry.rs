//! Client Registry — the authoritative map of connection ID → connection.
//!
//! Inbound results from the upstream are routed back to their owning
//! client through this registry; an unregistered owner means the message
//! is dropped (best-effort delivery, no buffering).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use relay_core::ids::ClientId;
use relay_core::rpc::RpcNotification;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Registry of connected clients.
pub struct ClientRegistry {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<ClientId, Arc<ClientConnection>>>,
    /// Atomic counter tracking total connections (avoids read-locking for
    /// count queries).
    active_count: AtomicUsize,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Register a connection. A connection ID is never reused, so an
    /// insert for an existing key replaces a stale entry for the same
    /// underlying socket rather than admitting a second one.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        if conns.insert(connection.id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, client_id: &ClientId) {
        let mut conns = self.connections.write().await;
        if conns.remove(client_id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Get a connection by ID.
    pub async fn get(&self, client_id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(client_id).cloned()
    }

    /// Whether a client is currently registered.
    pub async fn contains(&self, client_id: &ClientId) -> bool {
        self.connections.read().await.contains_key(client_id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Send a one-way notification to every registered client.
    ///
    /// Returns how many clients the message was enqueued for. Used for
    /// the `shutdown` notification; per-client drops are logged, never
    /// retried.
    pub async fn notify_all(&self, notification: &RpcNotification) -> usize {
        let json = match serde_json::to_string(notification) {
            Ok(j) => j,
            Err(e) => {
                warn!(method = notification.method, error = %e, "failed to serialize notification");
                return 0;
            }
        };

        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.send(json.clone()) {
                delivered += 1;
            } else {
                counter!("ws_notify_drops_total").increment(1);
                debug!(client_id = %conn.id, method = notification.method, "failed to enqueue notification");
            }
        }
        debug!(
            method = notification.method,
            delivered, "notification fan-out"
        );
        delivered
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
