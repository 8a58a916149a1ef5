//! outlier-probe - pre-flight mode check.
//!
//! Reads `ModeSelectionFactors` JSON from the file named by the first
//! argument (or stdin when absent or `-`) and prints the mode the
//! orchestrator would pick, using learned statistics when
//! `PROBE_MODE_STATS_PATH` points at an existing file.

use anyhow::Context;
use outlier_probe::{
    config::ServiceConfig,
    mode::{ModeSelectionFactors, ModeSelector, ModeSelectorConfig},
};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outlier_probe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServiceConfig::from_env()?;

    let input = match std::env::args().nth(1).filter(|a| a != "-") {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading factors from {}", path))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("reading factors from stdin")?;
            buf
        }
    };
    let factors: ModeSelectionFactors =
        serde_json::from_str(&input).context("parsing mode selection factors")?;

    let selector = match &config.mode_stats_path {
        Some(path) if path.exists() => {
            match ModeSelector::load_from_path(ModeSelectorConfig::default(), path).await {
                Ok(selector) => {
                    info!(path = %path.display(), "Loaded mode statistics");
                    selector
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable mode statistics");
                    ModeSelector::default()
                }
            }
        }
        _ => ModeSelector::default(),
    };

    let result = selector.select_mode(&factors);
    info!(mode = %result.mode, confidence = result.confidence, "Selected mode");
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
