//! JSON-RPC 2.0 wire types spoken on the client-facing socket.
//!
//! Three envelope shapes: [`RpcRequest`] (has an `id`), [`RpcResponse`]
//! (echoes the `id`, carries `result` xor `error`), and
//! [`RpcNotification`] (one-way, no `id`).
//!
//! Correlation ids are opaque [`Value`]s echoed back exactly as received —
//! a request with `"id": null` gets a response with `"id": null`, and a
//! request with no `id` at all gets a response with no `id`. Clients rely
//! on this to reassociate responses that arrive in completion order.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// The protocol version stamped on every outgoing envelope.
pub const JSONRPC_VERSION: &str = "2.0";

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed registry of wire error codes.
///
/// The `-327xx` range mirrors the JSON-RPC 2.0 convention; the `-320xx`
/// range is application-defined for session and upstream failures.
pub mod codes {
    /// Message was not valid JSON or not a request envelope.
    pub const PARSE_ERROR: i64 = -32700;
    /// No handler registered for the requested method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// A required parameter was missing or of the wrong shape.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Handler fault or timeout inside the bridge.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Upstream connect failed or timed out during `session.create`.
    pub const SESSION_CREATE_FAILED: i64 = -32001;
    /// The referenced session is not in the registry.
    pub const SESSION_NOT_FOUND: i64 = -32002;
    /// The session exists but its upstream connection is not writable.
    pub const CONNECTION_UNAVAILABLE: i64 = -32003;
}

/// A dispatch-level error carrying a wire code and message.
///
/// Every handler failure becomes one of these; the supervisor converts it
/// into an error envelope and the connection stays open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    /// Wire error code from [`codes`].
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Create an error with an explicit code.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Malformed request envelope.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, message)
    }

    /// Unknown method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    /// Missing or invalid parameters.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Internal bridge fault.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// Upstream connect failure during session creation.
    #[must_use]
    pub fn session_create_failed(message: impl Into<String>) -> Self {
        Self::new(
            codes::SESSION_CREATE_FAILED,
            format!("Failed to create session: {}", message.into()),
        )
    }

    /// Unknown session.
    #[must_use]
    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            codes::SESSION_NOT_FOUND,
            format!("Session not found: {session_id}"),
        )
    }

    /// Upstream connection not writable.
    #[must_use]
    pub fn connection_unavailable() -> Self {
        Self::new(
            codes::CONNECTION_UNAVAILABLE,
            "Session connection not available",
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

/// Deserialize an `id` field so that an explicit `null` survives as
/// `Some(Value::Null)` while an absent field stays `None`.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Incoming request from a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol tag; not validated on input, always `"2.0"` on output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Correlation id, echoed verbatim in the response.
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    /// Method name (e.g. `session.create`).
    pub method: String,
    /// Optional parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing response to a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoed correlation id (absent if the request had none).
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    /// Result payload (present on success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (present on failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Structured error body inside an [`RpcResponse`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Wire error code (negative integer from [`codes`]).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// One-way server-to-client notification (no `id`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Notification method (e.g. `connected`, `stream`, `shutdown`).
    pub method: String,
    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcResponse {
    /// Build a success response.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response from an [`RpcError`].
    #[must_use]
    pub fn error(id: Option<Value>, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: error.code,
                message: error.message.clone(),
            }),
        }
    }

    /// Whether this response carries a result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl RpcNotification {
    /// Create a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params: Some(params),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
