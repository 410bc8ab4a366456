//! `/health` endpoint payload.

use serde::Serialize;
use std::time::Instant;

use crate::upstream::probe::ProbeReport;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when the upstream is reachable, `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the bridge started.
    pub uptime_secs: u64,
    /// Current client connection count.
    pub connections: usize,
    /// Number of active sessions.
    pub active_sessions: usize,
    /// Upstream probe outcome (`ok` / `timeout` / `unreachable` / `malformed`).
    pub upstream: String,
    /// Probe round-trip latency, present when the probe succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_latency_ms: Option<u64>,
}

/// Build a health response from live counters and a probe report.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    sessions: usize,
    probe: &ProbeReport,
) -> HealthResponse {
    let status = if probe.outcome.is_healthy() {
        "ok"
    } else {
        "degraded"
    };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions: sessions,
        upstream: probe.outcome.as_str().into(),
        upstream_latency_ms: probe.latency_ms,
    }
}
