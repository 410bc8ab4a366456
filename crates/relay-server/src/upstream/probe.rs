//! Diagnostic probe — one transient round trip against the upstream.
//!
//! Opens a throwaway connection, sends a ping request, waits up to the
//! bounded timeout for any response, and reports latency plus outcome.
//! Never touches the session registry.

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::debug;

use super::connector::{self, UpstreamError};

/// Classification of one probe round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The upstream answered with parseable JSON.
    Ok,
    /// Connect or reply did not arrive within the timeout.
    Timeout,
    /// The connection could not be established (or dropped mid-probe).
    ConnectError,
    /// A reply arrived but was not valid JSON.
    Malformed,
}

impl ProbeOutcome {
    /// Stable string used in the health payload.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::ConnectError => "unreachable",
            Self::Malformed => "malformed",
        }
    }

    /// Whether the upstream is considered reachable.
    #[must_use]
    pub fn is_healthy(self) -> bool {
        self == Self::Ok
    }
}

/// Result of one probe round trip.
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    /// What happened.
    pub outcome: ProbeOutcome,
    /// Round-trip latency, present only on [`ProbeOutcome::Ok`].
    pub latency_ms: Option<u64>,
}

impl ProbeReport {
    fn failed(outcome: ProbeOutcome) -> Self {
        Self {
            outcome,
            latency_ms: None,
        }
    }
}

/// Run one probe round trip against `url`.
pub async fn run_probe(url: &str, timeout: Duration) -> ProbeReport {
    let start = Instant::now();

    let (link, mut events) = match connector::connect(url, timeout).await {
        Ok(pair) => pair,
        Err(UpstreamError::Timeout { .. }) => return ProbeReport::failed(ProbeOutcome::Timeout),
        Err(_) => return ProbeReport::failed(ProbeOutcome::ConnectError),
    };

    let ping = json!({"jsonrpc": "2.0", "id": 0, "method": "ping"}).to_string();
    if link.send(ping).await.is_err() {
        link.shutdown();
        return ProbeReport::failed(ProbeOutcome::ConnectError);
    }

    let reply = tokio::time::timeout(timeout, events.recv()).await;
    link.shutdown();

    match reply {
        Err(_) => ProbeReport::failed(ProbeOutcome::Timeout),
        Ok(None) => ProbeReport::failed(ProbeOutcome::ConnectError),
        Ok(Some(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(_) => {
                let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                debug!(url, latency_ms, "probe ok");
                ProbeReport {
                    outcome: ProbeOutcome::Ok,
                    latency_ms: Some(latency_ms),
                }
            }
            Err(_) => ProbeReport::failed(ProbeOutcome::Malformed),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
