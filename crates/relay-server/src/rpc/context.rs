//! Shared state passed to every RPC handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sessions::SessionRegistry;
use crate::ws::registry::ClientRegistry;

/// Dependencies a handler needs: the two registries plus the upstream
/// message-id counter.
pub struct RpcContext {
    /// Session registry (the only place sessions are mutated).
    pub sessions: Arc<SessionRegistry>,
    /// Client registry (used to route results back).
    pub clients: Arc<ClientRegistry>,
    /// Monotonic id injected into forwarded upstream payloads.
    message_ids: AtomicU64,
}

impl RpcContext {
    /// Create a context over the given registries.
    pub fn new(sessions: Arc<SessionRegistry>, clients: Arc<ClientRegistry>) -> Self {
        Self {
            sessions,
            clients,
            message_ids: AtomicU64::new(1),
        }
    }

    /// Allocate the next upstream message id (starts at 1, monotonically
    /// increasing for the process lifetime).
    pub fn next_message_id(&self) -> u64 {
        self.message_ids.fetch_add(1, Ordering::Relaxed)
    }
}
