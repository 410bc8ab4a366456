//! Connection supervisor — handles a single client from upgrade through
//! disconnect.
//!
//! Lifecycle per connection: register in the client registry, announce
//! the assigned id with a `connected` notification, dispatch each inbound
//! frame on its own task (responses are written in completion order;
//! correlation ids are the client's reassembly key), and on disconnect
//! close every owned session *before* unregistering.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::ids::ClientId;
use relay_core::rpc::RpcNotification;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::rpc::context::RpcContext;
use crate::rpc::handler::handle_message;
use crate::rpc::registry::MethodRegistry;

use super::connection::{ClientConnection, ConnectionState};

/// Outbound queue depth per connection.
const SEND_QUEUE_CAPACITY: usize = 256;

/// Run the supervisor loop for one accepted client.
#[instrument(skip_all, fields(client_id))]
pub async fn run_client_session(
    ws: WebSocket,
    registry: Arc<MethodRegistry>,
    ctx: Arc<RpcContext>,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    let client_id = ClientId::new();
    let _ = tracing::Span::current().record("client_id", client_id.as_str());

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(SEND_QUEUE_CAPACITY);
    let connection = Arc::new(ClientConnection::new(client_id.clone(), send_tx));

    let connection_start = std::time::Instant::now();
    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    ctx.clients.add(Arc::clone(&connection)).await;
    connection.set_state(ConnectionState::Open);

    // Announce the assigned client id.
    let connected = RpcNotification::new(
        "connected",
        json!({
            "clientId": client_id,
            "serverVersion": env!("CARGO_PKG_VERSION"),
        }),
    );
    if let Ok(text) = serde_json::to_string(&connected) {
        let _ = ws_tx.send(Message::Text(text.into())).await;
    }

    // Outbound pump: forwards queued messages, pings on an interval, and
    // delivers the shutdown farewell when the process is stopping.
    let outbound_conn = Arc::clone(&connection);
    let outbound_shutdown = shutdown.clone();
    let pong_timeout = config.pong_timeout();
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(config.ping_interval());
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > pong_timeout
                    {
                        warn!(client_id = %outbound_conn.id, "client unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_shutdown.cancelled() => {
                    let farewell = RpcNotification::new(
                        "shutdown",
                        json!({"reason": "server_shutdown"}),
                    );
                    if let Ok(text) = serde_json::to_string(&farewell) {
                        let _ = ws_tx.send(Message::Text(text.into())).await;
                    }
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Inbound loop: decode and dispatch until the client goes away.
    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };

                let text = match msg {
                    Message::Text(ref t) => Some(t.to_string()),
                    Message::Binary(ref data) => match std::str::from_utf8(data) {
                        Ok(s) => Some(s.to_owned()),
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            None
                        }
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        connection.set_state(ConnectionState::Closing);
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        connection.mark_alive();
                        None
                    }
                };

                let Some(text) = text else { continue };

                // Each request runs on its own task: a slow session.create
                // must not block an unrelated send on the same connection.
                let registry = Arc::clone(&registry);
                let ctx = Arc::clone(&ctx);
                let conn = Arc::clone(&connection);
                let cid = client_id.clone();
                drop(tokio::spawn(async move {
                    let result = handle_message(&cid, &text, &registry, &ctx).await;
                    if !conn.send(result.response_json) {
                        debug!(client_id = %cid, method = result.method, "failed to enqueue response (channel full or closed)");
                    }
                }));
            }
            () = shutdown.cancelled() => {
                connection.set_state(ConnectionState::Closing);
                break;
            }
        }
    }

    // Cascade: owned sessions first, then the registry entry.
    connection.set_state(ConnectionState::Closed);
    let closed = ctx.sessions.close_all_for_client(&client_id).await;
    ctx.clients.remove(&client_id).await;

    info!(sessions_closed = closed, "client disconnected");
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection_start.elapsed().as_secs_f64());

    if shutdown.is_cancelled() {
        // Let the pump deliver the farewell and close frame first.
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), outbound).await;
    } else {
        outbound.abort();
    }
}

#[cfg(test)]
mod tests {
    // The supervisor loop needs a real WebSocket and is exercised by
    // tests/integration.rs. Unit tests here cover the envelope helpers.

    use relay_core::rpc::RpcNotification;
    use serde_json::json;

    #[test]
    fn connected_notification_shape() {
        let n = RpcNotification::new(
            "connected",
            json!({"clientId": "client-1", "serverVersion": "0.1.0"}),
        );
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["method"], "connected");
        assert_eq!(v["params"]["clientId"], "client-1");
        assert!(v.get("id").is_none());
    }

    #[test]
    fn shutdown_notification_shape() {
        let n = RpcNotification::new("shutdown", json!({"reason": "server_shutdown"}));
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["method"], "shutdown");
        assert_eq!(v["params"]["reason"], "server_shutdown");
    }
}
