//! `BridgeServer` — Axum HTTP + WebSocket front.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ServerConfig, UpstreamConfig};
use crate::health::{self, HealthResponse};
use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;
use crate::sessions::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::upstream::probe;
use crate::ws::registry::ClientRegistry;
use crate::ws::session::run_client_session;

/// Errors from starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested bind address.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Client registry.
    pub clients: Arc<ClientRegistry>,
    /// Session registry.
    pub sessions: Arc<SessionRegistry>,
    /// RPC method registry.
    pub registry: Arc<MethodRegistry>,
    /// Handler context.
    pub ctx: Arc<RpcContext>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the bridge started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: ServerConfig,
    /// Upstream configuration (probe target).
    pub upstream: UpstreamConfig,
}

/// The bridge server.
pub struct BridgeServer {
    state: AppState,
}

impl BridgeServer {
    /// Create a new server over fresh registries.
    pub fn new(config: ServerConfig, upstream: UpstreamConfig, registry: MethodRegistry) -> Self {
        let clients = Arc::new(ClientRegistry::new());
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&clients),
            upstream.clone(),
        ));
        let ctx = Arc::new(RpcContext::new(
            Arc::clone(&sessions),
            Arc::clone(&clients),
        ));
        Self {
            state: AppState {
                clients,
                sessions,
                registry: Arc::new(registry),
                ctx,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                config,
                upstream,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
    }

    /// Bind the listening socket and start serving.
    ///
    /// Returns the bound address (useful with port 0) and the serve task
    /// handle. A bind failure is fatal — callers exit non-zero.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let bind_addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener =
            TcpListener::bind(&bind_addr)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: bind_addr.clone(),
                    source,
                })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;

        let app = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server loop ended with error");
            }
        });

        info!(%addr, "bridge listening");
        Ok((addr, handle))
    }

    /// Get the client registry.
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.state.clients
    }

    /// Get the session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.state.registry
    }
}

/// GET /health — read-only diagnostics including an upstream probe.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = probe::run_probe(&state.upstream.url, state.upstream.connect_timeout()).await;
    let resp = health::health_check(
        state.start_time,
        state.clients.connection_count(),
        state.sessions.count(),
        &report,
    );
    Json(resp)
}

/// GET /ws — WebSocket upgrade into the connection supervisor.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.clients.connection_count() >= state.config.max_connections {
        warn!(
            max = state.config.max_connections,
            "connection limit reached, rejecting client"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let registry = Arc::clone(&state.registry);
    let ctx = Arc::clone(&state.ctx);
    let config = state.config.clone();
    let token = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_client_session(socket, registry, ctx, config, token))
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> BridgeServer {
        // Short probe timeout keeps /health tests fast against a dead
        // upstream.
        let upstream = UpstreamConfig {
            url: "ws://127.0.0.1:1".into(),
            connect_timeout_ms: 300,
        };
        BridgeServer::new(ServerConfig::default(), upstream, MethodRegistry::new())
    }

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
    }

    #[tokio::test]
    async fn registries_start_empty() {
        let server = make_server();
        assert_eq!(server.clients().connection_count(), 0);
        assert_eq!(server.sessions().count(), 0);
        assert!(server.registry().methods().is_empty());
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_reports_degraded_without_upstream() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "degraded");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["active_sessions"], 0);
        assert!(parsed["uptime_secs"].is_number());
        assert!(parsed["upstream"].is_string());
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let server = make_server();
        let app = server.router();

        // A plain GET without upgrade headers is rejected, not 404
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .expect("join error");
    }

    #[tokio::test]
    async fn listen_rejects_taken_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();

        // Second server on the same port must fail to bind
        let config = ServerConfig {
            port: addr.port(),
            ..ServerConfig::default()
        };
        let second = BridgeServer::new(config, UpstreamConfig::default(), MethodRegistry::new());
        let result = second.listen().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));

        server.shutdown().shutdown();
        let _ = handle.await;
    }
}
