//! Matching engine service entry point

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use engine_service::{initialize_logging, load_config, ServiceState};

#[derive(Debug, Parser)]
#[command(name = "matching-engine", version, about = "Per-product order matching engine")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "MATCHING_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    initialize_logging(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.service.data_dir.display(),
        products = config.products.len(),
        "starting matching engine service"
    );

    let state = ServiceState::start(&config).await?;
    let products: Vec<String> = state.products().map(ToString::to_string).collect();
    info!(?products, "all engines running, press Ctrl+C to stop");

    let stopped_early = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("shutdown signal received");
            false
        }
        _ = state.any_stopped() => {
            error!("an engine stopped unexpectedly, shutting down the rest");
            true
        }
    };

    let failed = state.shutdown_within(config.shutdown_timeout()).await;
    if failed > 0 || stopped_early {
        bail!("{} engine(s) stopped with errors", failed);
    }

    info!("matching engine service stopped");
    Ok(())
}
