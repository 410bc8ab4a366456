//! The fixed method set.
//!
//! Four operations: `session.create`, `session.close`, `send`, and the
//! `stream` status acknowledgement. Anything else falls through to the
//! registry's method-not-found path.

use async_trait::async_trait;
use relay_core::ids::{ClientId, SessionId};
use relay_core::rpc::RpcError;
use serde_json::{Value, json};
use tracing::debug;

use crate::rpc::context::RpcContext;
use crate::rpc::registry::{MethodHandler, MethodRegistry};

/// Register the bridge's method set.
pub fn register_all(registry: &mut MethodRegistry) {
    registry.register("session.create", SessionCreateHandler);
    registry.register("session.close", SessionCloseHandler);
    registry.register("send", SendHandler);
    registry.register("stream", StreamHandler);
}

/// Extract a required string parameter.
fn require_str(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    params
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RpcError::invalid_params(format!("Missing {key} parameter")))
}

/// `session.create` — open an upstream connection and register a session
/// owned by the calling client.
pub struct SessionCreateHandler;

#[async_trait]
impl MethodHandler for SessionCreateHandler {
    async fn handle(
        &self,
        client_id: &ClientId,
        _params: Option<Value>,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let session_id = ctx
            .sessions
            .create(client_id)
            .await
            .map_err(|e| RpcError::session_create_failed(e.to_string()))?;
        Ok(json!({ "sessionId": session_id }))
    }
}

/// `session.close` — idempotently close a session.
pub struct SessionCloseHandler;

#[async_trait]
impl MethodHandler for SessionCloseHandler {
    async fn handle(
        &self,
        _client_id: &ClientId,
        params: Option<Value>,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let session_id = SessionId::from(require_str(params.as_ref(), "sessionId")?);
        if !ctx.sessions.close(&session_id).await {
            debug!(session_id = %session_id, "close for already-closed session");
        }
        Ok(json!({ "closed": true, "sessionId": session_id }))
    }
}

/// `send` — forward an opaque payload to a session's upstream connection,
/// injecting the bridge's monotonic message id.
pub struct SendHandler;

#[async_trait]
impl MethodHandler for SendHandler {
    async fn handle(
        &self,
        _client_id: &ClientId,
        params: Option<Value>,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let session_id = SessionId::from(require_str(params.as_ref(), "sessionId")?);
        let message = params
            .as_ref()
            .and_then(|p| p.get("message"))
            .cloned()
            .ok_or_else(|| RpcError::invalid_params("Missing message parameter"))?;
        let Value::Object(mut payload) = message else {
            return Err(RpcError::invalid_params("message must be an object"));
        };

        let session = ctx
            .sessions
            .lookup(&session_id)
            .await
            .ok_or_else(|| RpcError::session_not_found(&session_id))?;
        if !session.link.is_open() {
            return Err(RpcError::connection_unavailable());
        }

        // The injected id is for upstream correlation only; the client
        // gets it back as `messageId`, never verbatim inside a payload.
        let message_id = ctx.next_message_id();
        let _ = payload.insert("id".to_owned(), json!(message_id));

        session
            .link
            .send(Value::Object(payload).to_string())
            .await
            .map_err(|_| RpcError::connection_unavailable())?;

        Ok(json!({
            "sent": true,
            "sessionId": session_id,
            "messageId": message_id,
        }))
    }
}

/// `stream` — acknowledge that streaming is active for a session. The
/// actual streaming happens via `stream` notifications pushed by the
/// upstream router.
pub struct StreamHandler;

#[async_trait]
impl MethodHandler for StreamHandler {
    async fn handle(
        &self,
        _client_id: &ClientId,
        params: Option<Value>,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let session_id = SessionId::from(require_str(params.as_ref(), "sessionId")?);
        let _ = ctx
            .sessions
            .lookup(&session_id)
            .await
            .ok_or_else(|| RpcError::session_not_found(&session_id))?;
        Ok(json!({
            "streaming": true,
            "sessionId": session_id,
            "status": "active",
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::StreamExt;
    use relay_core::rpc::codes;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use crate::config::UpstreamConfig;
    use crate::sessions::SessionRegistry;
    use crate::ws::connection::ClientConnection;
    use crate::ws::registry::ClientRegistry;

    /// Mock upstream that records every received text frame.
    async fn recording_upstream() -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::channel(64);
        drop(tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen_tx.clone();
                drop(tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            Message::Text(t) => {
                                if seen.send(t.to_string()).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                }));
            }
        }));
        (format!("ws://{addr}"), seen_rx)
    }

    async fn make_fixture(url: &str) -> (RpcContext, ClientId) {
        let clients = Arc::new(ClientRegistry::new());
        let client_id = ClientId::new();
        let (tx, _rx) = mpsc::channel(32);
        clients
            .add(Arc::new(ClientConnection::new(client_id.clone(), tx)))
            .await;
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&clients),
            UpstreamConfig {
                url: url.to_owned(),
                connect_timeout_ms: 2000,
            },
        ));
        (RpcContext::new(sessions, clients), client_id)
    }

    // ── session.create ──────────────────────────────────────────────

    #[tokio::test]
    async fn create_returns_session_id() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let result = SessionCreateHandler
            .handle(&client_id, None, &ctx)
            .await
            .unwrap();
        let sid = result["sessionId"].as_str().unwrap();
        assert!(sid.starts_with("session-"));
        assert_eq!(ctx.sessions.count(), 1);
    }

    #[tokio::test]
    async fn create_against_dead_upstream_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (ctx, client_id) = make_fixture(&format!("ws://{addr}")).await;
        let err = SessionCreateHandler
            .handle(&client_id, None, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SESSION_CREATE_FAILED);
        assert!(err.message.starts_with("Failed to create session"));
        assert_eq!(ctx.sessions.count(), 0);
    }

    // ── session.close ───────────────────────────────────────────────

    #[tokio::test]
    async fn close_requires_session_id() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let err = SessionCloseHandler
            .handle(&client_id, Some(json!({})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        assert_eq!(err.message, "Missing sessionId parameter");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let created = SessionCreateHandler
            .handle(&client_id, None, &ctx)
            .await
            .unwrap();
        let sid = created["sessionId"].as_str().unwrap().to_owned();
        let params = Some(json!({"sessionId": sid}));

        let first = SessionCloseHandler
            .handle(&client_id, params.clone(), &ctx)
            .await
            .unwrap();
        assert_eq!(first["closed"], true);
        assert_eq!(first["sessionId"], sid);

        // Second close still succeeds
        let second = SessionCloseHandler
            .handle(&client_id, params, &ctx)
            .await
            .unwrap();
        assert_eq!(second["closed"], true);
    }

    #[tokio::test]
    async fn close_unknown_session_succeeds() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let result = SessionCloseHandler
            .handle(&client_id, Some(json!({"sessionId": "never-was"})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["closed"], true);
    }

    // ── send ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_requires_session_id_and_message() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let err = SendHandler
            .handle(&client_id, Some(json!({"message": {}})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        assert_eq!(err.message, "Missing sessionId parameter");

        let err = SendHandler
            .handle(&client_id, Some(json!({"sessionId": "s1"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        assert_eq!(err.message, "Missing message parameter");
    }

    #[tokio::test]
    async fn send_rejects_non_object_message() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let err = SendHandler
            .handle(
                &client_id,
                Some(json!({"sessionId": "s1", "message": "scalar"})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn send_unknown_session() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let err = SendHandler
            .handle(
                &client_id,
                Some(json!({"sessionId": "ghost", "message": {"m": 1}})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SESSION_NOT_FOUND);
        assert!(err.message.contains("ghost"));
    }

    #[tokio::test]
    async fn send_forwards_with_injected_id() {
        let (url, mut seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let created = SessionCreateHandler
            .handle(&client_id, None, &ctx)
            .await
            .unwrap();
        let sid = created["sessionId"].as_str().unwrap().to_owned();

        let result = SendHandler
            .handle(
                &client_id,
                Some(json!({
                    "sessionId": sid,
                    "message": {"method": "prompt", "params": {"text": "hi"}, "id": "client-chosen"}
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["sent"], true);
        assert_eq!(result["sessionId"], sid);
        assert_eq!(result["messageId"], 1);

        // Upstream saw the payload with the bridge's id overwriting the
        // client's.
        let forwarded = tokio::time::timeout(std::time::Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        let parsed: Value = serde_json::from_str(&forwarded).unwrap();
        assert_eq!(parsed["method"], "prompt");
        assert_eq!(parsed["params"]["text"], "hi");
        assert_eq!(parsed["id"], 1);
    }

    #[tokio::test]
    async fn send_message_ids_increase() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let created = SessionCreateHandler
            .handle(&client_id, None, &ctx)
            .await
            .unwrap();
        let sid = created["sessionId"].as_str().unwrap().to_owned();

        for expected in 1..=3u64 {
            let result = SendHandler
                .handle(
                    &client_id,
                    Some(json!({"sessionId": sid, "message": {"n": expected}})),
                    &ctx,
                )
                .await
                .unwrap();
            assert_eq!(result["messageId"], expected);
        }
    }

    #[tokio::test]
    async fn send_after_close_is_session_not_found() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let created = SessionCreateHandler
            .handle(&client_id, None, &ctx)
            .await
            .unwrap();
        let sid = created["sessionId"].as_str().unwrap().to_owned();
        let _ = SessionCloseHandler
            .handle(&client_id, Some(json!({"sessionId": sid})), &ctx)
            .await
            .unwrap();

        let err = SendHandler
            .handle(
                &client_id,
                Some(json!({"sessionId": sid, "message": {"m": 1}})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SESSION_NOT_FOUND);
    }

    // ── stream ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn stream_acknowledges_active_session() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let created = SessionCreateHandler
            .handle(&client_id, None, &ctx)
            .await
            .unwrap();
        let sid = created["sessionId"].as_str().unwrap().to_owned();

        let result = StreamHandler
            .handle(&client_id, Some(json!({"sessionId": sid})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["streaming"], true);
        assert_eq!(result["status"], "active");
    }

    #[tokio::test]
    async fn stream_unknown_session() {
        let (url, _seen) = recording_upstream().await;
        let (ctx, client_id) = make_fixture(&url).await;

        let err = StreamHandler
            .handle(&client_id, Some(json!({"sessionId": "nope"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SESSION_NOT_FOUND);
    }

    // ── register_all ────────────────────────────────────────────────

    #[test]
    fn register_all_registers_method_set() {
        let mut registry = MethodRegistry::new();
        register_all(&mut registry);
        assert_eq!(
            registry.methods(),
            vec!["send", "session.close", "session.create", "stream"]
        );
    }
}
