//! hubble-server - processing core for hubble

mod app;
mod telemetry;

use tracing::info;

use hubble_core::Config;

use crate::app::{shutdown_signal, App};
use crate::telemetry::LogSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    let log_settings = LogSettings::from_env();
    let _file_guard = telemetry::init(&log_settings);
    info!(
        subsystem = "server",
        log_format = ?log_settings.format,
        log_file = log_settings.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    info!(subsystem = "server", config = ?config, "Configuration loaded");

    let app = App::start(&config).await?;

    shutdown_signal().await;

    app.shutdown().await;
    Ok(())
}
