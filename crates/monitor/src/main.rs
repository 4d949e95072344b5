//! Standalone monitor binary: polls every configured donation wallet until
//! interrupted.

use std::{io, sync::Arc};

use donation_watch_domain::config::BootstrapConfig;
use donation_watch_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use donation_watch_monitor::{DonationMonitor, MonitorError};
use donation_watch_storage::SeaOrmStorage;
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = BootstrapConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    let _telemetry = init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let monitor = DonationMonitor::from_config(&config, Arc::new(storage))?;

    monitor.start_monitoring(config.monitor_interval_minutes())?;
    // A failed signal listener is treated like an interrupt.
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    monitor.stop_monitoring();
    Ok(())
}
