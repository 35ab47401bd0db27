//! poolscaled — the poolscale daemon.
//!
//! # Usage
//!
//! ```text
//! poolscaled run --config poolscale.toml --snapshot cluster.json --listen 0.0.0.0:9100
//! poolscaled check --config poolscale.toml
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use poolscale_controller::{Controller, NodeGroupLister};
use poolscale_core::{PoolscaleConfig, parse_duration};
use poolscale_metrics::MetricsRegistry;
use poolscaled::{SnapshotLister, build_router};

const DEFAULT_LOG_FILTER: &str = "info,poolscaled=debug,poolscale=debug";

#[derive(Parser)]
#[command(name = "poolscaled", about = "Node group autoscaler daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler.
    Run {
        /// Path to the TOML config file.
        #[arg(long, default_value = "poolscale.toml")]
        config: PathBuf,

        /// JSON cluster snapshot the node groups are listed from.
        #[arg(long, default_value = "cluster.json")]
        snapshot: PathBuf,

        /// Override the configured scan interval (e.g. "30s", "5m").
        #[arg(long, value_parser = parse_duration)]
        scan_interval: Option<Duration>,

        /// Force every node group into dry-run.
        #[arg(long)]
        dry_run: bool,

        /// Run a single sweep and exit.
        #[arg(long)]
        once: bool,

        /// Serve /metrics and /healthz on this address.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Validate a config file and print a summary.
    Check {
        /// Path to the TOML config file.
        #[arg(long, default_value = "poolscale.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            snapshot,
            scan_interval,
            dry_run,
            once,
            listen,
        } => run(&config, snapshot, scan_interval, dry_run, once, listen).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn load_config(path: &Path) -> anyhow::Result<PoolscaleConfig> {
    PoolscaleConfig::from_file(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;

    println!(
        "{}: ok (scan_interval {:?}, dry_run {}, {} node groups)",
        path.display(),
        config.scan_interval,
        config.dry_run,
        config.node_groups.len()
    );
    for group in &config.node_groups {
        println!(
            "  {:<20} {}={} nodes {}..={} thresholds {}/{}/{} rates -{}/-{}/+{}{}",
            group.name,
            group.label_key,
            group.label_value,
            group.min_nodes,
            group.max_nodes,
            group.taint_lower_threshold_percent,
            group.taint_upper_threshold_percent,
            group.scale_up_threshold_percent,
            group.fast_removal_rate,
            group.slow_removal_rate,
            group.fast_revival_rate,
            if group.dry_run { " (dry-run)" } else { "" },
        );
        if !group.thresholds_ordered() {
            println!("  warning: {} thresholds are not ordered lower <= upper <= scale_up", group.name);
        }
    }
    Ok(())
}

async fn run(
    config_path: &Path,
    snapshot: PathBuf,
    scan_interval: Option<Duration>,
    dry_run: bool,
    once: bool,
    listen: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(interval) = scan_interval {
        config.scan_interval = interval;
    }
    if dry_run {
        config.dry_run = true;
    }
    info!(config = %config_path.display(), snapshot = %snapshot.display(), "poolscaled starting");

    let listers: HashMap<String, Arc<dyn NodeGroupLister>> = config
        .node_groups
        .iter()
        .map(|group| {
            let lister: Arc<dyn NodeGroupLister> = Arc::new(SnapshotLister::new(&snapshot, group));
            (group.name.clone(), lister)
        })
        .collect();

    // No mutation backend ships here; only dry-run groups can be driven.
    let metrics = MetricsRegistry::new();
    let mut controller = Controller::new(&config, listers, None, metrics.clone())
        .context("failed to build controller")?;

    if once {
        let report = controller.run_once();
        for (node_group, outcome) in &report.outcomes {
            if let Ok(cycle) = outcome {
                info!(
                    %node_group,
                    usage = cycle.usage_percent,
                    decision = ?cycle.decision,
                    affected = cycle.nodes_affected,
                    "sweep result"
                );
            }
        }
        info!(
            node_groups = report.outcomes.len(),
            failed = report.failed(),
            duration = ?report.duration,
            "single sweep finished"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let loop_handle = tokio::spawn(async move {
        controller.run_forever(true, shutdown_rx).await;
    });

    match listen {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!(%addr, "metrics server listening");

            axum::serve(listener, build_router(metrics))
                .with_graceful_shutdown(wait_for_shutdown(shutdown_tx))
                .await
                .context("metrics server failed")?;
        }
        None => wait_for_shutdown(shutdown_tx).await,
    }

    loop_handle.await.context("autoscaler task failed")?;
    info!("poolscaled stopped");
    Ok(())
}

/// Wait for Ctrl-C, then tell the control loop to stop.
async fn wait_for_shutdown(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c; shutting down");
    }
    info!("shutdown signal received");
    if shutdown_tx.send(true).is_err() {
        warn!("autoscaler loop already stopped");
    }
}
