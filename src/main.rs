//! Location sharing client
//!
//! `share` publishes our position to the location store, follows the
//! counterpart and prints one JSON event per line for a renderer.
//! `check` runs the store connectivity self-test.
//!
//! Module structure:
//! - `domain/` - Coordinates, session events
//! - `io/` - Store and analysis clients, position sources, store service
//! - `services/` - Movement gate, throttle, orchestrator, self-test
//! - `infra/` - Config, logging, metrics

use clap::{Parser, Subcommand};
use location_share::domain::events::SessionEvent;
use location_share::infra::{logging, Config, SessionMetrics};
use location_share::io::{
    HttpAnalysisClient, HttpLocationStore, PositionSource, ReplaySource, StdinSource,
};
use location_share::services::{run_self_test, Orchestrator, SessionSettings};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Share your position with a friend
#[derive(Parser, Debug)]
#[command(name = "location-share", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start sharing and stream events to stdout until Ctrl-C or the source ends
    Share {
        /// Our user id (overrides config)
        #[arg(short, long)]
        user: Option<String>,

        /// Counterpart user id (overrides config)
        #[arg(short, long)]
        friend: Option<String>,

        /// Replay fixes from a file instead of reading stdin
        #[arg(long)]
        replay: Option<String>,
    },
    /// Push a test position and list the store contents
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "location_share_starting");

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        store_url = %config.store_base_url(),
        analysis_endpoint = %config.analysis_endpoint(),
        movement_threshold_m = %config.movement_threshold_m(),
        analysis_interval_ms = %config.analysis_min_interval().as_millis(),
        "config_loaded"
    );

    let store = Arc::new(HttpLocationStore::new(config.store_base_url(), config.store_timeout())?);

    match args.command {
        Command::Check => {
            let report = run_self_test(store.as_ref()).await;
            for step in &report.steps {
                let status = if step.ok { "ok" } else { "FAILED" };
                println!("{:<16} {:<6} {:>6} ms  {}", step.name, status, step.elapsed.as_millis(), step.detail);
            }
            if !report.passed() {
                error!("self_test_failed");
                std::process::exit(1);
            }
            info!("self_test_passed");
            Ok(())
        }
        Command::Share { user, friend, replay } => {
            let user = user.or_else(|| config.user_id().map(str::to_string)).unwrap_or_default();
            let friend =
                friend.or_else(|| config.friend_id().map(str::to_string)).unwrap_or_default();
            share(&config, store, &user, &friend, replay).await
        }
    }
}

async fn share(
    config: &Config,
    store: Arc<HttpLocationStore>,
    user: &str,
    friend: &str,
    replay: Option<String>,
) -> anyhow::Result<()> {
    let analysis = Arc::new(HttpAnalysisClient::new(
        config.analysis_endpoint(),
        config.analysis_model(),
        config.analysis_temperature(),
        config.analysis_timeout(),
    )?);

    let source: Arc<dyn PositionSource> =
        match replay.as_deref().or(config.replay_file()) {
            Some(path) => {
                info!(path = %path, interval_ms = %config.replay_interval().as_millis(), "position_source_replay");
                Arc::new(ReplaySource::new(path, config.replay_interval()))
            }
            None => {
                info!("position_source_stdin");
                Arc::new(StdinSource)
            }
        };

    let metrics = Arc::new(SessionMetrics::new());
    let mut orchestrator = Orchestrator::new(
        SessionSettings::from_config(config),
        store,
        analysis,
        source,
        metrics.clone(),
    );

    if let Err(e) = orchestrator.start(user, friend).await {
        error!(error = %e, "sharing_start_failed");
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl_c_received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Renderer feed: one JSON object per line on stdout
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(256);
    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        while let Some(event) = event_rx.recv().await {
            let mut out = stdout.lock();
            let _ = writeln!(out, "{}", event.to_json());
            let _ = out.flush();
        }
    });

    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics.report().log();
            }
        });
    }

    orchestrator.run(event_tx, shutdown_rx).await;
    let _ = printer.await;

    info!("location_share_stopped");
    Ok(())
}
