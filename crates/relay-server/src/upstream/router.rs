//! Upstream message routing.
//!
//! Each session's upstream reader hands inbound frames here. Delivery is
//! fire-and-forget: decode failures, unknown sessions, and unavailable
//! clients all drop the message with a log line — there is no buffering
//! and no acknowledgement.

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use relay_core::ids::SessionId;
use relay_core::rpc::RpcNotification;

use crate::sessions::SessionRegistry;
use crate::ws::registry::ClientRegistry;

/// Wrap a decoded upstream payload in a `stream` notification.
///
/// The payload's own fields are flattened into `params`; the bridge's
/// session identifier is authoritative and always wins over a payload
/// field of the same name.
pub fn build_stream_notification(session_id: &SessionId, payload: &Value) -> RpcNotification {
    let mut params = Map::new();
    if let Value::Object(fields) = payload {
        for (key, value) in fields {
            let _ = params.insert(key.clone(), value.clone());
        }
    }
    let _ = params.insert("sessionId".to_owned(), json!(session_id.as_str()));
    RpcNotification::new("stream", Value::Object(params))
}

/// Route one upstream frame to the session's owning client.
pub async fn route_upstream_message(
    session_id: &SessionId,
    text: &str,
    sessions: &SessionRegistry,
    clients: &ClientRegistry,
) {
    let payload: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "dropping undecodable upstream message");
            return;
        }
    };

    let Some(owner) = sessions.owner_of(session_id).await else {
        debug!(session_id = %session_id, "message for unknown session, dropping");
        return;
    };

    let Some(connection) = clients.get(&owner).await else {
        debug!(session_id = %session_id, client_id = %owner, "client not registered, dropping message");
        return;
    };
    if !connection.is_open() {
        debug!(session_id = %session_id, client_id = %owner, "client not open, dropping message");
        return;
    }

    let notification = build_stream_notification(session_id, &payload);
    match serde_json::to_value(&notification) {
        Ok(value) => {
            if !connection.send_json(&value) {
                warn!(session_id = %session_id, client_id = %owner, "failed to forward upstream message (channel full or closed)");
            }
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "failed to serialize stream notification");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
