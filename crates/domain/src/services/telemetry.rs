//! Process-wide tracing subscriber and Prometheus recorder.

use std::{net::SocketAddr, sync::Arc};

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{get_optional_var, hydrate_env_file};

const DEFAULT_LOG_FILTER: &str = "info";

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

/// Log filter and optional scrape listener for one binary.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER` (default `info`) and
    /// `<PREFIX>_METRICS_ADDRESS`; blank values count as unset.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let prefix = prefix.trim().to_ascii_uppercase();
        Self {
            log_filter: get_optional_var(&format!("{prefix}_LOG_FILTER"))
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            metrics_address: get_optional_var(&format!("{prefix}_METRICS_ADDRESS")),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Handle to the installed recorder; cloned into HTTP state for `/metrics`.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

/// Installs tracing and the Prometheus recorder on first call. Later calls
/// return a guard over the recorder already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;

    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new();
            if let Some(addr) = config.metrics_address() {
                let socket: SocketAddr = addr.parse().map_err(|err: std::net::AddrParseError| {
                    TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                })?;
                builder = builder.with_http_listener(socket);
            }

            let handle = builder
                .install_recorder()
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            describe_engine_metrics();
            Ok(Arc::new(handle))
        })
        .cloned()
}

fn describe_engine_metrics() {
    describe_counter!(
        "chain_requests_total",
        "Adapter calls per network, by result (ok, error, not_found)"
    );
    describe_counter!("monitor_cycles_total", "Completed monitor cycles, by result");
    describe_counter!(
        "monitor_transactions_total",
        "Transactions seen by the monitor, by network and disposition"
    );
    describe_gauge!(
        "monitor_last_checked_timestamp",
        "Unix time of the last successful check per network"
    );
    describe_counter!("verifier_results_total", "Verification outcomes per network");
    describe_counter!("price_oracle_fetch_total", "Price table loads, live or fallback");
    describe_counter!("api_requests_total", "HTTP requests by endpoint and status code");
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, sync::Mutex};

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn clear() {
        env::set_var("DONATION_WATCH_SKIP_DOTENV", "1");
        env::remove_var("WATCHTEST_LOG_FILTER");
        env::remove_var("WATCHTEST_METRICS_ADDRESS");
    }

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear();
        env::set_var("WATCHTEST_METRICS_ADDRESS", "  ");

        let cfg = TelemetryConfig::from_env("watchtest");
        assert_eq!(cfg.log_filter(), "info");
        assert_eq!(cfg.metrics_address(), None);
        clear();
    }

    #[test]
    fn prefix_selects_variables() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear();
        env::set_var("WATCHTEST_LOG_FILTER", "donation_watch_monitor=debug");
        env::set_var("WATCHTEST_METRICS_ADDRESS", "127.0.0.1:9898");

        let cfg = TelemetryConfig::from_env(" WatchTest ");
        assert_eq!(cfg.log_filter(), "donation_watch_monitor=debug");
        assert_eq!(cfg.metrics_address(), Some("127.0.0.1:9898"));
        clear();
    }

    #[test]
    fn guard_renders_recorded_metrics() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear();
        let telemetry = init_telemetry(&TelemetryConfig::from_env("WATCHTEST")).unwrap();
        metrics::counter!("monitor_cycles_total", "result" => "ok").increment(1);

        let again = init_telemetry(&TelemetryConfig::from_env("WATCHTEST")).unwrap();
        assert!(telemetry.render_metrics().contains("monitor_cycles_total"));
        assert!(again.render_metrics().contains("monitor_cycles_total"));
    }
}
