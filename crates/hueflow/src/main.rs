//! hueflow - Art-Net to Hue Entertainment streaming bridge
//!
//! Reads the v3 configuration document, binds the Art-Net receiver and
//! drives one streaming session per configured hub until SIGINT.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use hueflow_control::Coordinator;
use hueflow_core::BridgeConfig;

/// Interval between aggregate status log lines
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "hueflow", version, about = "Art-Net to Hue Entertainment bridge")]
struct Args {
    /// Path to the configuration document
    #[arg(short, long, default_value = "hueflow.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG takes precedence over the info default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("hueflow starting (config {:?})", args.config);

    // Startup validation failures exit non-zero
    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration {:?}", args.config))?;
    let coordinator = Coordinator::start(config)
        .await
        .context("startup failed")?;

    let mut stats = tokio::time::interval(STATS_INTERVAL);
    stats.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                info!("Received shutdown signal, draining...");
                break;
            }
            _ = stats.tick() => {
                let (frames, connected, hubs) = coordinator.status_registry().summary();
                info!(
                    "Stats: {} frames received, {}/{} hubs streaming",
                    frames, connected, hubs
                );
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
