//! Settings types for the bridge.

use serde::{Deserialize, Serialize};

/// Top-level settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Client-facing server settings.
    pub server: ServerSettings,
    /// Upstream endpoint settings.
    pub upstream: UpstreamSettings,
    /// Log verbosity.
    pub log_level: LogLevel,
}

/// Client-facing server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket + health port.
    pub port: u16,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Server ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect a client after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4501,
            max_connections: 50,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
        }
    }
}

/// Upstream endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// WebSocket URL of the back-end endpoint.
    pub url: String,
    /// Whether the bridge spawns the upstream process itself.
    pub spawn: bool,
    /// Command line used when `spawn` is true.
    pub command: String,
    /// Bounded timeout for opening a session's upstream connection, in
    /// milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4500".to_string(),
            spawn: true,
            command: "codex app-server --listen ws://127.0.0.1:4500".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

/// Log verbosity for the tracing subscriber.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level (least verbose).
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    #[must_use]
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
