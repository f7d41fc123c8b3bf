//! Face Check-in Kiosk - Main Entry Point

use std::path::PathBuf;

use anyhow::Context;
use checkin::{init_logging, run, CheckinConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = CheckinConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(&config.logging)?;

    info!("=== Face Check-in v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Replaying camera frames from {}", config.camera.frames_dir.display());

    run(config).await?;
    Ok(())
}
