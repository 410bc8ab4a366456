//! Upstream WebSocket connector.
//!
//! Opens a connection to the back-end endpoint under a bounded timeout
//! and returns an [`UpstreamLink`] (outbound half) plus a channel of
//! inbound text frames. Two pump tasks own the socket halves; cancelling
//! the link's token tears both down and closes the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffered frames per direction before backpressure applies.
const CHANNEL_CAPACITY: usize = 64;

/// Errors from establishing or using an upstream connection.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The connect handshake did not complete within the bounded timeout.
    #[error("connection timeout to {url} after {timeout_ms}ms")]
    Timeout {
        /// Endpoint URL.
        url: String,
        /// Configured timeout.
        timeout_ms: u64,
    },
    /// The connect attempt failed outright.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Endpoint URL.
        url: String,
        /// Underlying handshake error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    /// The connection is no longer writable.
    #[error("upstream connection closed")]
    Closed,
}

/// Outbound handle to one upstream connection.
///
/// Cheap to clone; all clones share the same socket and cancel token.
#[derive(Clone)]
pub struct UpstreamLink {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
}

impl UpstreamLink {
    /// Whether the connection is believed writable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.cancel.is_cancelled()
    }

    /// Send a text frame to the upstream.
    pub async fn send(&self, text: String) -> Result<(), UpstreamError> {
        if !self.is_open() {
            return Err(UpstreamError::Closed);
        }
        self.tx.send(text).await.map_err(|_| UpstreamError::Closed)
    }

    /// Tear the connection down. Idempotent; already-closed links are a
    /// no-op.
    pub fn shutdown(&self) {
        self.open.store(false, Ordering::Relaxed);
        self.cancel.cancel();
    }
}

/// Open an upstream connection with a bounded timeout.
///
/// On success returns the outbound [`UpstreamLink`] and a receiver of
/// inbound text frames. The receiver yields `None` once the upstream
/// closes the connection (or the link is shut down).
pub async fn connect(
    url: &str,
    timeout: Duration,
) -> Result<(UpstreamLink, mpsc::Receiver<String>), UpstreamError> {
    debug!(url, "connecting to upstream");

    let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| UpstreamError::Timeout {
            url: url.to_owned(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?
        .map_err(|source| UpstreamError::Connect {
            url: url.to_owned(),
            source,
        })?;

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let open = Arc::new(AtomicBool::new(true));

    // Write pump: drains the outbound channel into the socket.
    let write_cancel = cancel.clone();
    let write_open = Arc::clone(&open);
    drop(tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = out_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if sink.send(Message::text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                () = write_cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        write_open.store(false, Ordering::Relaxed);
    }));

    // Read pump: forwards inbound text frames until the socket ends.
    let read_cancel = cancel.clone();
    let read_open = Arc::clone(&open);
    drop(tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text.to_string()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match std::str::from_utf8(&data) {
                                Ok(text) => {
                                    if in_tx.send(text.to_owned()).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => {
                                    warn!(len = data.len(), "dropping non-UTF8 upstream frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    }
                }
                () = read_cancel.cancelled() => break,
            }
        }
        read_open.store(false, Ordering::Relaxed);
        // Dropping in_tx ends the receiver, which is how session readers
        // observe the close.
    }));

    Ok((
        UpstreamLink {
            tx: out_tx,
            cancel,
            open,
        },
        in_rx,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
