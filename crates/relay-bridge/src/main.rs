//! # relay-bridge
//!
//! Bridge server binary — loads configuration, optionally spawns the
//! upstream process, starts the server, and drives graceful shutdown on
//! SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::config::{ServerConfig, UpstreamConfig};
use relay_server::rpc::handlers;
use relay_server::rpc::registry::MethodRegistry;
use relay_server::server::BridgeServer;
use relay_server::upstream::process::UpstreamProcess;
use relay_settings::RelaySettings;
use tracing_subscriber::EnvFilter;

/// Relay bridge server.
#[derive(Parser, Debug)]
#[command(name = "relay-bridge", about = "WebSocket session bridge")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Upstream WebSocket URL (overrides settings).
    #[arg(long)]
    upstream_url: Option<String>,

    /// Do not spawn the upstream process, connect to an external one.
    #[arg(long)]
    no_spawn: bool,

    /// Path to the settings file (default `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Fold CLI overrides into loaded settings.
    fn apply_to(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.upstream_url {
            settings.upstream.url.clone_from(url);
        }
        if self.no_spawn {
            settings.upstream.spawn = false;
        }
    }
}

fn server_config(settings: &RelaySettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_connections: settings.server.max_connections,
        heartbeat_interval_ms: settings.server.heartbeat_interval_ms,
        heartbeat_timeout_ms: settings.server.heartbeat_timeout_ms,
        ..ServerConfig::default()
    }
}

fn upstream_config(settings: &RelaySettings) -> UpstreamConfig {
    UpstreamConfig {
        url: settings.upstream.url.clone(),
        connect_timeout_ms: settings.upstream.connect_timeout_ms,
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => result.context("failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for ctrl-c")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings before logging — the log level lives in them.
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(relay_settings::loader::settings_path);
    let mut settings =
        relay_settings::loader::load_settings_from_path(&settings_path).unwrap_or_default();
    args.apply_to(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_filter_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        host = settings.server.host,
        port = settings.server.port,
        upstream = settings.upstream.url,
        spawn_upstream = settings.upstream.spawn,
        "starting bridge"
    );

    // Optionally own the upstream process. A spawn failure is not fatal —
    // the bridge can serve an externally managed upstream instead.
    let upstream_process = if settings.upstream.spawn {
        match UpstreamProcess::spawn(&settings.upstream.command) {
            Ok(mut process) => {
                let _ = process.wait_ready().await;
                Some(process)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn upstream process, expecting an external one");
                None
            }
        }
    } else {
        None
    };

    let mut registry = MethodRegistry::new();
    handlers::register_all(&mut registry);
    let method_count = registry.methods().len();

    let server = BridgeServer::new(
        server_config(&settings),
        upstream_config(&settings),
        registry,
    );

    let (addr, handle) = server.listen().await.context("failed to bind bridge")?;
    tracing::info!("bridge listening on ws://{addr}/ws ({method_count} methods registered)");

    shutdown_signal().await?;

    tracing::info!("shutting down");
    // Cancelling the token makes every client session send the shutdown
    // notification, close its socket, and cascade-close its sessions.
    server.shutdown().shutdown();
    let _ = handle.await;

    if let Some(process) = upstream_process {
        process.terminate().await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
