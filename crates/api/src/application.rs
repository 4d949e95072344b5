use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use thiserror::Error;
use tracing::info;

use donation_watch_domain::config::{ApiConfig, BootstrapConfig, ConfigError};
use donation_watch_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use donation_watch_domain::storage::StorageError;
use donation_watch_domain::DonationStore;
use donation_watch_monitor::{DonationMonitor, MonitorError};
use donation_watch_storage::SeaOrmStorage;

use crate::{
    handlers::{
        create_crypto_donation_handler, metrics_handler, monitor_check_handler,
        monitor_status_handler, prices_handler, submit_transaction_handler, verify_handler,
        wallet_handler, wallets_handler,
    },
    state::AppState,
};

/// Donor-facing routes.
pub fn public_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/verify", web::post().to(verify_handler))
        .route(
            "/api/v1/donations/crypto",
            web::post().to(create_crypto_donation_handler),
        )
        .route(
            "/api/v1/donations/{id}/transaction",
            web::post().to(submit_transaction_handler),
        )
        .route("/api/v1/wallets", web::get().to(wallets_handler))
        .route("/api/v1/wallets/{network}", web::get().to(wallet_handler))
        .route("/api/v1/prices", web::get().to(prices_handler))
        .route("/api/v1/monitor/status", web::get().to(monitor_status_handler));
}

/// Operator routes; served on the internal listener when one is configured.
pub fn internal_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/api/v1/monitor/check", web::post().to(monitor_check_handler));
}

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let chains = BootstrapConfig::load_from_env()?;

    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;

    let storage: Arc<dyn DonationStore> =
        Arc::new(SeaOrmStorage::connect(config.database_url()).await?);
    let monitor = DonationMonitor::from_config(&chains, storage.clone())?;
    monitor.start_monitoring(chains.monitor_interval_minutes())?;

    let state = AppState::new(storage, monitor.clone(), telemetry);
    let operator_routes_on_public = !config.has_internal_listener();

    let public_state = state.clone();
    let public_server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(Logger::default())
            .configure(public_routes);
        if operator_routes_on_public {
            app = app.configure(internal_routes);
        }
        app
    })
    .bind(config.api_bind_address())?
    .run();
    info!(address = config.api_bind_address(), "public listener bound");

    let served = match config.internal_bind_address() {
        Some(addr) => {
            let internal_state = state.clone();
            let internal_server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(internal_state.clone()))
                    .wrap(Logger::default())
                    .configure(internal_routes)
            })
            .bind(addr)?
            .run();
            info!(address = addr, "internal listener bound");
            tokio::try_join!(public_server, internal_server).map(|_| ())
        }
        None => public_server.await,
    };

    monitor.stop_monitoring();
    served?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
