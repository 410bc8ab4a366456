//! Session Registry — the authoritative map of session ID → owning
//! client + upstream connection.
//!
//! This is the only place sessions are created, looked up, or destroyed.
//! Creation opens the upstream connection *before* the session becomes
//! visible; a connect failure leaves the registry unmutated. When a
//! session's upstream connection drops, the session is deleted outright —
//! no record ever holds a dead handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use metrics::gauge;
use relay_core::ids::{ClientId, SessionId};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, instrument};

use crate::config::UpstreamConfig;
use crate::upstream::connector::{self, UpstreamError, UpstreamLink};
use crate::upstream::router;
use crate::ws::registry::ClientRegistry;

/// Errors from session creation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The upstream connect failed or timed out.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// The owning client disconnected while the upstream connect was in
    /// flight; the fresh connection was torn down.
    #[error("client disconnected before session creation completed")]
    OwnerDisconnected,
}

/// One session's record. Internal; callers get [`SessionSnapshot`]s.
struct SessionRecord {
    client_id: ClientId,
    link: UpstreamLink,
    created_at: DateTime<Utc>,
}

/// A point-in-time view of one session.
#[derive(Clone)]
pub struct SessionSnapshot {
    /// The session's identifier.
    pub session_id: SessionId,
    /// The owning client connection.
    pub client_id: ClientId,
    /// Handle to the session's upstream connection.
    pub link: UpstreamLink,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// Registry of active sessions.
///
/// Cheap to clone; all clones share the same state. Each session's
/// upstream reader task holds a clone for owner lookups and cleanup.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
    clients: Arc<ClientRegistry>,
    upstream: UpstreamConfig,
    active_count: Arc<AtomicUsize>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(clients: Arc<ClientRegistry>, upstream: UpstreamConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clients,
            upstream,
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a session for `client_id`.
    ///
    /// Opens the upstream connection under the configured timeout, then
    /// re-checks that the owner is still registered (it may have
    /// disconnected during the await — there is no mid-flight
    /// cancellation). Only then does the session become visible.
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn create(&self, client_id: &ClientId) -> Result<SessionId, SessionError> {
        let (link, events) =
            connector::connect(&self.upstream.url, self.upstream.connect_timeout()).await?;

        if !self.clients.contains(client_id).await {
            link.shutdown();
            return Err(SessionError::OwnerDisconnected);
        }

        let session_id = SessionId::new();
        {
            let mut sessions = self.sessions.write().await;
            let _ = sessions.insert(
                session_id.clone(),
                SessionRecord {
                    client_id: client_id.clone(),
                    link,
                    created_at: Utc::now(),
                },
            );
        }
        let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        gauge!("sessions_active").increment(1.0);

        info!(session_id = %session_id, "session created");

        // Subscribe to the upstream connection for the session's lifetime.
        let registry = self.clone();
        let sid = session_id.clone();
        drop(tokio::spawn(async move {
            registry.run_upstream_reader(sid, events).await;
        }));

        Ok(session_id)
    }

    /// Consume upstream frames for one session until the connection ends,
    /// then delete the session (hard-close policy).
    async fn run_upstream_reader(self, session_id: SessionId, mut events: mpsc::Receiver<String>) {
        while let Some(text) = events.recv().await {
            router::route_upstream_message(&session_id, &text, &self, &self.clients).await;
        }
        if self.close(&session_id).await {
            info!(session_id = %session_id, "upstream connection closed, session removed");
        }
    }

    /// Look up a session.
    pub async fn lookup(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|record| SessionSnapshot {
            session_id: session_id.clone(),
            client_id: record.client_id.clone(),
            link: record.link.clone(),
            created_at: record.created_at,
        })
    }

    /// Owning client of a session, if it exists.
    pub async fn owner_of(&self, session_id: &SessionId) -> Option<ClientId> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|r| r.client_id.clone())
    }

    /// Close a session. Idempotent: returns `false` if the session was
    /// not present. Closing an already-closed upstream link is a no-op.
    pub async fn close(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(record) => {
                record.link.shutdown();
                let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
                gauge!("sessions_active").decrement(1.0);
                info!(session_id = %session_id, "session closed");
                true
            }
            None => {
                debug!(session_id = %session_id, "close for unknown session (no-op)");
                false
            }
        }
    }

    /// Close every session owned by `client_id`. Returns how many were
    /// closed.
    pub async fn close_all_for_client(&self, client_id: &ClientId) -> usize {
        let mut sessions = self.sessions.write().await;
        let owned: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, record)| record.client_id == *client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in &owned {
            if let Some(record) = sessions.remove(session_id) {
                record.link.shutdown();
                let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
                gauge!("sessions_active").decrement(1.0);
                info!(session_id = %session_id, client_id = %client_id, "session closed (owner disconnected)");
            }
        }
        owned.len()
    }

    /// Number of active sessions.
    pub fn count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc as std_mpsc;

    use crate::ws::connection::ClientConnection;

    /// Boot a silent WebSocket server on an ephemeral port.
    async fn quiet_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_close() {
                            break;
                        }
                        // Swallow traffic; sessions stay open until torn down.
                        drop(msg);
                    }
                    let _ = ws.close(None).await;
                }));
            }
        }));
        format!("ws://{addr}")
    }

    fn upstream_config(url: &str) -> UpstreamConfig {
        UpstreamConfig {
            url: url.to_owned(),
            connect_timeout_ms: 2000,
        }
    }

    async fn registry_with_client(
        url: &str,
    ) -> (Arc<SessionRegistry>, ClientId, std_mpsc::Receiver<String>) {
        let clients = Arc::new(ClientRegistry::new());
        let client_id = ClientId::new();
        let (tx, rx) = std_mpsc::channel(32);
        clients
            .add(Arc::new(ClientConnection::new(client_id.clone(), tx)))
            .await;
        let registry = Arc::new(SessionRegistry::new(clients, upstream_config(url)));
        (registry, client_id, rx)
    }

    #[tokio::test]
    async fn create_registers_session() {
        let url = quiet_upstream().await;
        let (registry, client_id, _rx) = registry_with_client(&url).await;

        let session_id = registry.create(&client_id).await.unwrap();
        assert_eq!(registry.count(), 1);

        let snapshot = registry.lookup(&session_id).await.unwrap();
        assert_eq!(snapshot.client_id, client_id);
        assert!(snapshot.link.is_open());
    }

    #[tokio::test]
    async fn create_fails_when_upstream_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (registry, client_id, _rx) = registry_with_client(&format!("ws://{addr}")).await;
        let result = registry.create(&client_id).await;
        assert!(matches!(result, Err(SessionError::Upstream(_))));
        // Failure leaves the registry unmutated
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn create_fails_when_owner_unregistered() {
        let url = quiet_upstream().await;
        let clients = Arc::new(ClientRegistry::new());
        let registry = Arc::new(SessionRegistry::new(clients, upstream_config(&url)));

        // Client was never registered — simulates a disconnect racing the
        // connect await.
        let ghost = ClientId::new();
        let result = registry.create(&ghost).await;
        assert!(matches!(result, Err(SessionError::OwnerDisconnected)));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn session_ids_are_never_reissued() {
        let url = quiet_upstream().await;
        let (registry, client_id, _rx) = registry_with_client(&url).await;

        let first = registry.create(&client_id).await.unwrap();
        assert!(registry.close(&first).await);
        let second = registry.create(&client_id).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let url = quiet_upstream().await;
        let (registry, client_id, _rx) = registry_with_client(&url).await;

        let session_id = registry.create(&client_id).await.unwrap();
        assert!(registry.close(&session_id).await);
        assert!(!registry.close(&session_id).await);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn close_unknown_session_is_noop() {
        let url = quiet_upstream().await;
        let (registry, _client_id, _rx) = registry_with_client(&url).await;
        assert!(!registry.close(&SessionId::from("never-existed")).await);
    }

    #[tokio::test]
    async fn close_all_for_client_removes_only_owned() {
        let url = quiet_upstream().await;
        let clients = Arc::new(ClientRegistry::new());
        let (tx_a, _rx_a) = std_mpsc::channel(32);
        let (tx_b, _rx_b) = std_mpsc::channel(32);
        let client_a = ClientId::new();
        let client_b = ClientId::new();
        clients
            .add(Arc::new(ClientConnection::new(client_a.clone(), tx_a)))
            .await;
        clients
            .add(Arc::new(ClientConnection::new(client_b.clone(), tx_b)))
            .await;
        let registry = Arc::new(SessionRegistry::new(clients, upstream_config(&url)));

        let a1 = registry.create(&client_a).await.unwrap();
        let a2 = registry.create(&client_a).await.unwrap();
        let b1 = registry.create(&client_b).await.unwrap();

        let closed = registry.close_all_for_client(&client_a).await;
        assert_eq!(closed, 2);
        assert!(registry.lookup(&a1).await.is_none());
        assert!(registry.lookup(&a2).await.is_none());
        assert!(registry.lookup(&b1).await.is_some());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn close_all_for_client_with_no_sessions() {
        let url = quiet_upstream().await;
        let (registry, client_id, _rx) = registry_with_client(&url).await;
        assert_eq!(registry.close_all_for_client(&client_id).await, 0);
    }

    #[tokio::test]
    async fn owner_of_reports_owner() {
        let url = quiet_upstream().await;
        let (registry, client_id, _rx) = registry_with_client(&url).await;
        let session_id = registry.create(&client_id).await.unwrap();
        assert_eq!(registry.owner_of(&session_id).await, Some(client_id));
        assert!(registry.owner_of(&SessionId::from("nope")).await.is_none());
    }

    #[tokio::test]
    async fn upstream_close_deletes_session() {
        // An upstream that accepts, then immediately closes.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let _ = ws.close(None).await;
                }));
            }
        }));

        let (registry, client_id, _rx) = registry_with_client(&format!("ws://{addr}")).await;
        let session_id = registry.create(&client_id).await.unwrap();

        // The reader observes the close and removes the session.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while registry.lookup(&session_id).await.is_some() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "session should be removed after upstream close"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(registry.count(), 0);
    }
}
