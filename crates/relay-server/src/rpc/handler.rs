//! Frame handling — parses an inbound text frame as an [`RpcRequest`]
//! and routes it through the [`MethodRegistry`].

use relay_core::ids::ClientId;
use relay_core::rpc::{RpcError, RpcRequest, RpcResponse};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;

/// Result of handling one inbound frame.
pub struct HandleResult {
    /// Serialized JSON response to send back.
    pub response_json: String,
    /// The method that was called (empty if parsing failed).
    pub method: String,
    /// Typed response (for inspection without re-parsing).
    pub response: RpcResponse,
}

fn serialize(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        String::new()
    })
}

/// Handle one inbound text frame from a client.
///
/// A frame that does not decode as a request envelope produces a parse
/// error response with correlation id `null`; the connection stays open.
#[instrument(skip_all, fields(client_id = %client_id, method))]
pub async fn handle_message(
    client_id: &ClientId,
    message: &str,
    registry: &MethodRegistry,
    ctx: &RpcContext,
) -> HandleResult {
    let request: RpcRequest = match serde_json::from_str(message) {
        Ok(r) => r,
        Err(e) => {
            warn!("undecodable client frame");
            let response = RpcResponse::error(
                Some(Value::Null),
                &RpcError::parse_error(format!("Parse error: {e}")),
            );
            return HandleResult {
                response_json: serialize(&response),
                method: String::new(),
                response,
            };
        }
    };

    let method = request.method.clone();
    let _ = tracing::Span::current().record("method", method.as_str());
    debug!(method, "dispatching request");

    if !registry.has_method(&method) {
        warn!(method, "unknown method");
    }

    let response = registry.dispatch(client_id, request, ctx).await;
    HandleResult {
        response_json: serialize(&response),
        method,
        response,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
