//! VespWatch - Main Entry Point

use anyhow::Context;
use dashboard::config::AppConfig;
use dashboard::{init_logging, run};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VESPWATCH_CONFIG").ok())
        .map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(&config.logging)?;

    info!("=== VespWatch v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Capturing every {:.1}s (compensation {:.1}s), priority class {} ({})",
        config.capture_interval,
        config.processing_compensation,
        config.priority_class,
        config.priority_display_name
    );

    run(config).await
}
