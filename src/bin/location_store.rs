//! Location store service
//!
//! In-memory last-known-position store plus the analysis proxy. The
//! upstream API key is read from the environment variable named by
//! `server.api_key_env` and never sent to clients.

use clap::Parser;
use location_share::infra::{logging, Config, StoreMetrics};
use location_share::io::{AnalysisProxy, StoreServer, StoreState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "location-store", version, about = "Location store and analysis proxy")]
struct Args {
    /// Path to TOML configuration file (falls back to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "location_store_starting");

    let config = Config::load_from_path(Config::resolve_config_path(args.config.as_deref()));

    let api_key = std::env::var(config.api_key_env()).ok();
    if api_key.is_none() {
        warn!(env = %config.api_key_env(), "analysis_api_key_missing");
    }
    let proxy = AnalysisProxy::new(config.upstream_url(), api_key, config.analysis_timeout())?;

    let port = args.port.unwrap_or(config.server_port());
    let addr: SocketAddr = format!("{}:{}", config.server_bind_address(), port).parse()?;

    let metrics = Arc::new(StoreMetrics::new());
    let server = StoreServer::bind(addr, StoreState::new(proxy, metrics.clone())).await?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl_c_received");
            let _ = shutdown_tx.send(true);
        }
    });

    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let state = server.state();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                let summary = state.metrics.report();
                info!(
                    updates = %summary.location_updates,
                    queries = %summary.location_queries,
                    listings = %summary.location_listings,
                    bad_requests = %summary.bad_requests,
                    proxy_requests = %summary.proxy_requests,
                    proxy_failures = %summary.proxy_failures,
                    users = %state.registry.len(),
                    "store_metrics"
                );
            }
        });
    }

    server.run(shutdown_rx).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
