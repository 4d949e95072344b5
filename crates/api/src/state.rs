use std::sync::Arc;

use donation_watch_chains::WalletAggregator;
use donation_watch_domain::services::telemetry::TelemetryGuard;
use donation_watch_domain::DonationStore;
use donation_watch_monitor::DonationMonitor;

#[derive(Clone)]
pub struct AppState {
    storage: Arc<dyn DonationStore>,
    monitor: DonationMonitor,
    aggregator: Arc<WalletAggregator>,
    telemetry: TelemetryGuard,
}

impl AppState {
    /// The aggregator reuses the monitor's adapters, price feed and wallets.
    pub fn new(
        storage: Arc<dyn DonationStore>,
        monitor: DonationMonitor,
        telemetry: TelemetryGuard,
    ) -> Self {
        let aggregator = WalletAggregator::new(
            monitor.registry().clone(),
            monitor.prices().clone(),
            monitor.wallets().iter().cloned(),
        );
        Self {
            storage,
            monitor,
            aggregator: Arc::new(aggregator),
            telemetry,
        }
    }

    pub fn storage(&self) -> &dyn DonationStore {
        self.storage.as_ref()
    }

    pub fn monitor(&self) -> &DonationMonitor {
        &self.monitor
    }

    pub fn aggregator(&self) -> &WalletAggregator {
        self.aggregator.as_ref()
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }
}
