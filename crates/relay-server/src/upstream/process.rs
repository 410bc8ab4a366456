//! Upstream child process supervision.
//!
//! When configured to, the bridge spawns the back-end itself and forwards
//! its output into tracing. The supervision is deliberately minimal: an
//! unexpected exit is logged but does not tear down existing sessions,
//! and there is no automatic restart — session creation fails until the
//! process comes back.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{info, warn};

/// Markers the back-end prints once it is accepting connections.
const READY_MARKERS: [&str; 2] = ["listening", "ready"];

/// How long to wait for a ready marker before proceeding anyway.
const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// A spawned upstream process.
pub struct UpstreamProcess {
    child: Child,
    ready_rx: watch::Receiver<bool>,
}

impl UpstreamProcess {
    /// Spawn `command` through the shell with piped stdio.
    ///
    /// Stdout and stderr lines are forwarded to tracing; a ready marker
    /// on either stream flips the readiness flag.
    pub fn spawn(command: &str) -> std::io::Result<Self> {
        info!(command, "starting upstream process");

        let mut cmd = Command::new("bash");
        let _ = cmd
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let (ready_tx, ready_rx) = watch::channel(false);

        if let Some(stdout) = child.stdout.take() {
            let tx = ready_tx.clone();
            drop(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "upstream", "{line}");
                    if is_ready_marker(&line) {
                        let _ = tx.send(true);
                    }
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = ready_tx;
            drop(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "upstream", "{line}");
                    if is_ready_marker(&line) {
                        let _ = tx.send(true);
                    }
                }
                info!("upstream process output closed");
            }));
        }

        Ok(Self { child, ready_rx })
    }

    /// Wait until a ready marker is seen, or [`READY_TIMEOUT`] elapses.
    ///
    /// Returns `true` if the marker was observed. Proceeding without one
    /// is fine — the back-end may simply not print it.
    pub async fn wait_ready(&mut self) -> bool {
        if *self.ready_rx.borrow() {
            return true;
        }
        let ready = tokio::time::timeout(READY_TIMEOUT, self.ready_rx.changed()).await;
        match ready {
            Ok(Ok(())) => *self.ready_rx.borrow(),
            _ => {
                info!("no ready marker from upstream, proceeding");
                false
            }
        }
    }

    /// OS process id, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Ask the process to terminate and wait briefly for it to exit.
    pub async fn terminate(mut self) {
        match self.child.start_kill() {
            Ok(()) => {
                if tokio::time::timeout(Duration::from_secs(5), self.child.wait())
                    .await
                    .is_err()
                {
                    warn!("upstream process did not exit within 5s");
                }
            }
            Err(e) => {
                // Already exited on its own.
                info!(error = %e, "upstream process was not running");
            }
        }
    }
}

fn is_ready_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    READY_MARKERS.iter().any(|marker| lower.contains(marker))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_marker_detection() {
        assert!(is_ready_marker("server listening on ws://127.0.0.1:4500"));
        assert!(is_ready_marker("READY to accept connections"));
        assert!(!is_ready_marker("loading model"));
        assert!(!is_ready_marker(""));
    }

    #[tokio::test]
    async fn spawn_and_terminate() {
        let proc = UpstreamProcess::spawn("sleep 30").unwrap();
        assert!(proc.id().is_some());
        proc.terminate().await;
    }

    #[tokio::test]
    async fn wait_ready_sees_marker() {
        let mut proc = UpstreamProcess::spawn("echo 'listening on port 4500'; sleep 30").unwrap();
        assert!(proc.wait_ready().await);
        proc.terminate().await;
    }

    #[tokio::test]
    async fn wait_ready_without_marker_proceeds() {
        let mut proc = UpstreamProcess::spawn("sleep 30").unwrap();
        // Times out after READY_TIMEOUT and returns false
        assert!(!proc.wait_ready().await);
        proc.terminate().await;
    }

    #[tokio::test]
    async fn terminate_already_exited_process() {
        let proc = UpstreamProcess::spawn("true").unwrap();
        // Give it a moment to exit on its own
        tokio::time::sleep(Duration::from_millis(200)).await;
        proc.terminate().await;
    }

    #[tokio::test]
    async fn spawn_bad_command_still_spawns_shell() {
        // The shell itself spawns even if the inner command fails later.
        let proc = UpstreamProcess::spawn("no_such_binary_xyz").unwrap();
        proc.terminate().await;
    }
}
