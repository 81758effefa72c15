//! # Stackyard Node
//!
//! Loads an application model, then runs a DM and one agent per machine
//! until Ctrl+C.
//!
//! ```text
//! stackyard-node lamp.json --deploy
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use stackyard_runtime::{ApplicationModel, NodeConfig, NodeRuntime};
use stackyard_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "stackyard-node", version, about = "Run a DM and its agents in one process")]
struct Cli {
    /// JSON application model.
    model: PathBuf,

    /// Deploy and start every instance once the agents are up.
    #[arg(long)]
    deploy: bool,

    /// Messaging domain (overrides SY_DOMAIN).
    #[arg(long, env = "SY_DOMAIN")]
    domain: Option<String>,

    /// Log filter, e.g. `info` or `sy_02_lifecycle=debug`.
    #[arg(long, env = "SY_LOG_LEVEL")]
    log_level: Option<String>,

    /// JSON log lines.
    #[arg(long)]
    json: bool,

    /// Print the metrics on shutdown.
    #[arg(long)]
    dump_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::for_role("node");
    if let Some(level) = &cli.log_level {
        telemetry.log_level.clone_from(level);
    }
    telemetry.json_logs |= cli.json;
    let _telemetry = init_telemetry(telemetry).context("Failed to initialize telemetry")?;

    let mut config = NodeConfig::from_env().context("Invalid environment configuration")?;
    if let Some(domain) = cli.domain {
        config.messaging.domain = domain;
    }
    let model = ApplicationModel::load(&cli.model)?;

    let mut node = NodeRuntime::start(config).await?;
    node.add_application(&model).await?;
    if cli.deploy {
        node.dm().deploy_and_start_all(&model.name).await?;
    }

    info!(application = %model.name, "Node running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let stats = node.dm_stats();
    info!(
        sent = stats.sent,
        received = stats.received,
        failed_sending = stats.failed_sending,
        failed_reception = stats.failed_reception,
        "[DM] Delivery statistics"
    );
    node.shutdown().await?;

    if cli.dump_metrics {
        match encode_metrics() {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }
    }
    Ok(())
}
