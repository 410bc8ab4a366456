//! Runtime server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the client-facing server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Server ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Ping interval as a [`Duration`].
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong timeout as a [`Duration`].
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

/// Configuration for the upstream endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// WebSocket URL of the back-end endpoint.
    pub url: String,
    /// Bounded timeout for opening an upstream connection, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl UpstreamConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4500".into(),
            connect_timeout_ms: 5000,
        }
    }
}
