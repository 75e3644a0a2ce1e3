//! tandem-sim - drive two simulated legs through a cluster player
//!
//! Both legs run on virtual clocks; a col skew other than 1.0 makes them
//! drift apart so the drift monitor has something to correct. A snapshot of
//! the cluster is logged once per report interval until playback ends or
//! Ctrl+C is pressed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tandem_common::LegEvent;
use tandem_player::config::TomlConfig;
use tandem_player::{ClusterPlayer, Leg, PlayerStatus, SimulatedLeg};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for tandem-sim
#[derive(Parser, Debug)]
#[command(name = "tandem-sim")]
#[command(about = "Keep two simulated players in step")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    /// Row leg duration in milliseconds (0 = unbounded)
    #[arg(long)]
    row_duration: Option<u64>,

    /// Col leg duration in milliseconds (0 = unbounded)
    #[arg(long)]
    col_duration: Option<u64>,

    /// Col leg clock speed relative to real time
    #[arg(long)]
    col_skew: Option<f64>,

    /// Composite playback rate
    #[arg(long)]
    rate: Option<f64>,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "TANDEM_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(ms) = args.row_duration {
        config.sim.row_duration_ms = ms;
    }
    if let Some(ms) = args.col_duration {
        config.sim.col_duration_ms = ms;
    }
    if let Some(skew) = args.col_skew {
        config.sim.col_skew = skew;
    }
    if let Some(rate) = args.rate {
        config.sim.rate = rate;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize tracing
    let default_filter = format!(
        "tandem_player={level},tandem_sim={level},tandem_common={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting tandem-sim: row {}ms x{}, col {}ms x{}",
        config.sim.row_duration_ms,
        config.sim.row_skew,
        config.sim.col_duration_ms,
        config.sim.col_skew
    );

    let row: Arc<dyn Leg> = Arc::new(
        SimulatedLeg::new("row", config.sim.row_options()).context("Failed to create row leg")?,
    );
    let col: Arc<dyn Leg> = Arc::new(
        SimulatedLeg::new("col", config.sim.col_options()).context("Failed to create col leg")?,
    );
    let cluster =
        ClusterPlayer::new(row, col, config.sync.clone()).context("Failed to create cluster")?;

    let ended = Arc::new(Notify::new());
    let _on_status = {
        let observed = cluster.clone();
        let ended = Arc::clone(&ended);
        cluster.subscribe(
            LegEvent::StatusChanged,
            Arc::new(move || {
                let status = observed.status();
                info!(cluster = %observed.name(), "Status: {}", status);
                if status == PlayerStatus::Ended {
                    ended.notify_one();
                }
            }),
        )
    };

    cluster.set_playback_rate(config.sim.rate);
    cluster.ready(false).await.context("Failed to prepare legs")?;
    cluster.play().await.context("Failed to start playback")?;

    let mut report = tokio::time::interval(Duration::from_millis(config.sim.report_interval_ms.max(1)));
    tokio::pin! {
        let shutdown = shutdown_signal();
    }
    loop {
        tokio::select! {
            _ = report.tick() => {
                match serde_json::to_string(&cluster.snapshot()) {
                    Ok(json) => info!("{}", json),
                    Err(e) => warn!("Failed to serialize snapshot: {}", e),
                }
            }
            _ = ended.notified() => {
                info!("Playback ended");
                break;
            }
            _ = &mut shutdown => {
                if let Err(e) = cluster.stop().await {
                    warn!("Failed to stop cluster: {}", e);
                }
                break;
            }
        }
    }

    cluster.destroy();
    info!("tandem-sim shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
