//! # archon-gateway
//!
//! Archon realtime gateway binary: loads settings, starts logging and
//! metrics, then serves the WebSocket gateway until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use archon_http::{ApiClient, ClientConfig, RetryPolicy};
use archon_server::{ArchonServer, ServerConfig};
use archon_settings::{ArchonSettings, UpstreamSettings};

/// How long sessions get to wind down after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Archon realtime gateway.
#[derive(Parser, Debug)]
#[command(name = "archon-gateway", about = "Archon realtime gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.archon/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `archon_server=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Check `GET /health` on the upstream API before serving.
    #[arg(long)]
    check_upstream: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(archon_settings::settings_path)
    }
}

/// Gateway configuration from settings, with CLI overrides applied.
fn server_config(settings: &ArchonSettings, cli: &Cli) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: cli.host.clone().unwrap_or_else(|| server.host.clone()),
        port: cli.port.unwrap_or(server.port),
        allowed_origins: server.allowed_origins.clone(),
        max_connections: server.max_connections,
        ping_interval_secs: server.ping_interval_secs,
        pong_timeout_secs: server.pong_timeout_secs,
        send_queue_capacity: server.send_queue_capacity,
    }
}

/// Outbound client configuration from upstream settings.
fn client_config(upstream: &UpstreamSettings) -> ClientConfig {
    let base_delay = Duration::from_millis(upstream.base_delay_ms);
    let timeout = Duration::from_millis(upstream.timeout_ms);
    let mut config = ClientConfig::new(upstream.base_url.clone());
    config.get = RetryPolicy::new(upstream.get_retries, timeout).with_base_delay(base_delay);
    config.post = RetryPolicy::new(upstream.post_retries, timeout).with_base_delay(base_delay);
    config.upload = RetryPolicy::new(
        upstream.upload_retries,
        Duration::from_millis(upstream.upload_timeout_ms),
    )
    .with_base_delay(base_delay);
    config
}

async fn check_upstream(client: &ApiClient) -> Result<()> {
    let response = client
        .get("/health")
        .await
        .with_context(|| format!("upstream {} unreachable", client.config().base_url))?;
    tracing::info!(
        base_url = %client.config().base_url,
        status = response.status,
        "upstream reachable"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings come first: they decide the log format.
    let settings_path = args.settings_path();
    let settings = archon_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    if settings.logging.json {
        archon_core::logging::init_json_subscriber(level);
    } else {
        archon_core::logging::init_subscriber(level);
    }
    let metrics = archon_server::metrics::install_recorder();

    if args.check_upstream {
        let client = ApiClient::new(client_config(&settings.upstream));
        check_upstream(&client).await?;
    }

    let server = ArchonServer::new(server_config(&settings, &args)).with_metrics(metrics);
    let handle = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        "Archon gateway listening on ws://{}/ws (upstream {})",
        handle.addr(),
        settings.upstream.base_url
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if handle.stop(SHUTDOWN_GRACE).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown forced after {SHUTDOWN_GRACE:?}");
    }
    Ok(())
}
