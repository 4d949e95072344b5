use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{info, warn};

use donation_watch_chains::{
    AdapterError, AdapterRegistry, PriceFeed, PriceOracle, TransactionVerifier,
    VerificationRequest,
};
use donation_watch_domain::{
    config::{BootstrapConfig, ConfigError},
    policy::{self, ConfirmationPolicy},
    services::telemetry::TelemetryError,
    DonationMetadata, DonationStatus, DonationStore, Network, PriceTable, StatusUpdate,
    StorageError, StorageResult, WalletAddress,
};

use crate::{
    pipeline::{process_transaction, Disposition, PipelineContext},
    state::{CycleReport, MonitorState, MonitoringStatus},
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("chain client error: {0}")]
    Chain(#[from] AdapterError),
    #[error("monitoring is already running")]
    AlreadyRunning,
}

/// Result of one `reconcile_pending` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub completed: usize,
    pub failed: usize,
    pub unchanged: usize,
}

struct Scheduler {
    stop: watch::Sender<bool>,
    // Kept so the task is not detached silently; never aborted.
    _handle: JoinHandle<()>,
    interval_minutes: u64,
}

enum WalletCheck {
    Unconfigured,
    Checked { created: usize, skipped: usize },
    Failed,
}

/// Polls every configured donation wallet and records incoming payments.
///
/// Clones share state and the scheduler, so a clone handed to an HTTP
/// handler controls the same loop.
#[derive(Clone)]
pub struct DonationMonitor {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn DonationStore>,
    prices: Arc<dyn PriceFeed>,
    wallets: Arc<[WalletAddress]>,
    state: Arc<MonitorState>,
    verifier: TransactionVerifier,
    failure_cutoff: chrono::Duration,
    scheduler: Arc<Mutex<Option<Scheduler>>>,
}

impl DonationMonitor {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        store: Arc<dyn DonationStore>,
        prices: Arc<dyn PriceFeed>,
        wallets: impl IntoIterator<Item = WalletAddress>,
    ) -> Self {
        Self {
            verifier: TransactionVerifier::new(registry.clone(), ConfirmationPolicy::default()),
            registry,
            store,
            prices,
            wallets: wallets.into_iter().collect(),
            state: Arc::new(MonitorState::new()),
            failure_cutoff: chrono::Duration::hours(policy::DEFAULT_PENDING_FAILURE_CUTOFF_HOURS),
            scheduler: Arc::new(Mutex::new(None)),
        }
    }

    /// Production wiring: adapters and price oracle from `config`.
    pub fn from_config(
        config: &BootstrapConfig,
        store: Arc<dyn DonationStore>,
    ) -> Result<Self, MonitorError> {
        let registry = Arc::new(AdapterRegistry::from_config(config)?);
        let prices: Arc<dyn PriceFeed> = Arc::new(PriceOracle::from_config(config)?);
        Ok(Self::new(registry, store, prices, config.wallets().iter().cloned())
            .with_policy(config.confirmations().clone())
            .with_failure_cutoff(config.pending_failure_cutoff()))
    }

    pub fn with_policy(mut self, policy: ConfirmationPolicy) -> Self {
        self.verifier = TransactionVerifier::new(self.registry.clone(), policy);
        self
    }

    pub fn with_failure_cutoff(mut self, cutoff: chrono::Duration) -> Self {
        self.failure_cutoff = cutoff;
        self
    }

    pub fn with_state(mut self, state: Arc<MonitorState>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &Arc<MonitorState> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn prices(&self) -> &Arc<dyn PriceFeed> {
        &self.prices
    }

    pub fn verifier(&self) -> &TransactionVerifier {
        &self.verifier
    }

    pub fn wallets(&self) -> &[WalletAddress] {
        &self.wallets
    }

    pub fn wallet(&self, network: Network) -> Option<&WalletAddress> {
        self.wallets
            .iter()
            .find(|w| w.network == network && w.is_configured())
    }

    /// Runs one check immediately, then every `interval_minutes`.
    pub fn start_monitoring(&self, interval_minutes: u64) -> Result<(), MonitorError> {
        let mut guard = self.scheduler.lock().expect("mutex poisoned");
        if guard.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let interval_minutes = interval_minutes.max(1);
        let period = Duration::from_secs(interval_minutes * 60);
        let (stop, mut stopped) = watch::channel(false);
        let monitor = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                if *stopped.borrow() {
                    break;
                }
                monitor.run_scheduled_cycle().await;
            }
            info!("donation monitor stopped");
        });

        info!(interval_minutes, wallets = self.wallets.len(), "donation monitor started");
        *guard = Some(Scheduler {
            stop,
            _handle: handle,
            interval_minutes,
        });
        Ok(())
    }

    /// Prevents future ticks. A cycle already in flight runs to completion.
    /// Returns `false` if the monitor was not running.
    pub fn stop_monitoring(&self) -> bool {
        match self.scheduler.lock().expect("mutex poisoned").take() {
            Some(scheduler) => {
                let _ = scheduler.stop.send(true);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.lock().expect("mutex poisoned").is_some()
    }

    pub fn get_monitoring_status(&self) -> MonitoringStatus {
        let interval_minutes = self
            .scheduler
            .lock()
            .expect("mutex poisoned")
            .as_ref()
            .map(|s| s.interval_minutes);
        MonitoringStatus {
            running: interval_minutes.is_some(),
            interval_minutes,
            last_checked: self.state.watermarks(),
            processed_count: self.state.processed().len(),
            last_cycle: self.state.last_cycle(),
        }
    }

    async fn run_scheduled_cycle(&self) {
        self.check_for_new_donations().await;
        if let Err(err) = self.reconcile_pending().await {
            warn!(?err, "pending reconciliation failed");
        }
    }

    /// Scans every configured wallet once. Networks run concurrently; a
    /// failing network keeps its watermark and is retried next cycle.
    pub async fn check_for_new_donations(&self) -> CycleReport {
        let started_at = Utc::now();
        let prices = self.prices.get_prices().await;
        let checks = join_all(
            self.wallets
                .iter()
                .map(|wallet| self.check_wallet(wallet, started_at, &prices)),
        )
        .await;

        let mut report = CycleReport {
            started_at,
            finished_at: started_at,
            created: 0,
            skipped: 0,
            failed_networks: Vec::new(),
        };
        for (wallet, check) in self.wallets.iter().zip(checks) {
            match check {
                WalletCheck::Unconfigured => {}
                WalletCheck::Checked { created, skipped } => {
                    report.created += created;
                    report.skipped += skipped;
                }
                WalletCheck::Failed => report.failed_networks.push(wallet.network),
            }
        }
        report.finished_at = Utc::now();

        let result = if report.failed_networks.is_empty() {
            "ok"
        } else {
            "partial"
        };
        counter!("monitor_cycles_total", "result" => result).increment(1);
        info!(
            created = report.created,
            skipped = report.skipped,
            failed = report.failed_networks.len(),
            "donation check finished"
        );
        self.state.record_cycle(report.clone());
        report
    }

    async fn check_wallet(
        &self,
        wallet: &WalletAddress,
        started_at: chrono::DateTime<Utc>,
        prices: &PriceTable,
    ) -> WalletCheck {
        let network = wallet.network;
        if !wallet.is_configured() {
            info!(network = %network, "no donation address configured, skipping");
            return WalletCheck::Unconfigured;
        }
        let Some(adapter) = self.registry.get(network) else {
            warn!(network = %network, "no adapter registered");
            return WalletCheck::Failed;
        };

        let transactions = match adapter
            .fetch_recent_transactions(wallet, policy::RECENT_TRANSACTION_LIMIT)
            .await
        {
            Ok(transactions) => transactions,
            Err(err) => {
                warn!(network = %network, ?err, "fetching recent transactions failed");
                return WalletCheck::Failed;
            }
        };

        let ctx = PipelineContext {
            store: self.store.as_ref(),
            state: &self.state,
            prices,
            policy: self.verifier.policy(),
        };
        let watermark = self.state.watermark(network);
        let (mut created, mut skipped) = (0, 0);
        let mut store_failed = false;
        for tx in &transactions {
            match process_transaction(&ctx, wallet, watermark, tx).await {
                Ok(Disposition::Created { .. }) => created += 1,
                Ok(_) => skipped += 1,
                Err(err) => {
                    warn!(network = %network, tx_hash = %tx.hash, ?err, "recording donation failed");
                    store_failed = true;
                }
            }
        }
        if store_failed {
            return WalletCheck::Failed;
        }

        self.state.advance_watermark(network, started_at);
        gauge!("monitor_last_checked_timestamp", "network" => network.to_string())
            .set(started_at.timestamp() as f64);
        WalletCheck::Checked { created, skipped }
    }

    /// Re-verifies pending crypto donations that carry a transaction hash.
    /// Verified ones complete; ones rejected on chain data fail once older
    /// than the cutoff; manual-review and still-confirming ones stay pending.
    pub async fn reconcile_pending(&self) -> StorageResult<ReconcileReport> {
        let pending = self.store.find_pending(None).await?;
        let cutoff = Utc::now() - self.failure_cutoff;
        let mut report = ReconcileReport::default();

        for donation in pending {
            let (Some(network), Some(hash), Some(DonationMetadata::Crypto { wallet_address, destination_tag, .. })) =
                (donation.network, donation.tx_hash.as_deref(), donation.metadata.as_ref())
            else {
                report.unchanged += 1;
                continue;
            };
            let request = VerificationRequest::new(
                hash,
                network,
                donation.amount,
                wallet_address.as_str(),
                donation.currency.as_str(),
            )
            .with_destination_tag(*destination_tag);

            let result = match self.verifier.verify(&request).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(id = %donation.id, ?err, "cannot re-verify pending donation");
                    report.unchanged += 1;
                    continue;
                }
            };

            let still_confirming = result.checks.address_matches
                && result.checks.amount_matches
                && !result.checks.confirmations_met;
            let status = if result.is_verified() {
                DonationStatus::Completed
            } else if !result.is_valid && !still_confirming && donation.created_at < cutoff {
                DonationStatus::Failed
            } else {
                report.unchanged += 1;
                continue;
            };

            self.store
                .update_status(StatusUpdate {
                    id: donation.id,
                    status,
                    tx_hash: Some(hash.to_string()),
                    confirmations: Some(result.confirmations),
                })
                .await?;
            info!(id = %donation.id, %status, "pending donation reconciled");
            match status {
                DonationStatus::Completed => report.completed += 1,
                _ => report.failed += 1,
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use donation_watch_chains::{AdapterResult, NetworkAdapter, TransferQuery};
    use donation_watch_domain::{
        ChainTransaction, CreateOutcome, Donation, DonationId, NewDonation, PriceSource, TxStatus,
        WalletSnapshot,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const BTC_WALLET: &str = "bc1qdonation";
    const ETH_WALLET: &str = "0xdonation";

    #[derive(Default)]
    struct MemoryStore {
        donations: Mutex<Vec<Donation>>,
        fail_creates: AtomicBool,
    }

    impl MemoryStore {
        fn all(&self) -> Vec<Donation> {
            self.donations.lock().unwrap().clone()
        }

        fn seed(&self, donation: NewDonation) -> DonationId {
            let mut donations = self.donations.lock().unwrap();
            let id = DonationId(donations.len() as i64 + 1);
            donations.push(Donation {
                id,
                amount: donation.amount,
                amount_usd: donation.amount_usd,
                currency: donation.currency,
                network: donation.network,
                status: donation.status,
                tx_hash: donation.tx_hash,
                confirmations: donation.confirmations,
                metadata: donation.metadata,
                created_at: donation.created_at,
                updated_at: donation.created_at,
            });
            id
        }
    }

    #[async_trait]
    impl DonationStore for MemoryStore {
        async fn create(&self, donation: NewDonation) -> StorageResult<CreateOutcome> {
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(StorageError::Database("database is locked".into()));
            }
            let existing = self.donations.lock().unwrap().iter().find(|d| {
                d.tx_hash.is_some() && d.tx_hash == donation.tx_hash && d.network == donation.network
            }).map(|d| d.id);
            Ok(match existing {
                Some(id) => CreateOutcome::Existing(id),
                None => CreateOutcome::Inserted(self.seed(donation)),
            })
        }

        async fn find_by_tx_hash(
            &self,
            network: Network,
            tx_hash: &str,
        ) -> StorageResult<Option<Donation>> {
            let tx_hash = network.canonical_hash(tx_hash);
            Ok(self
                .all()
                .into_iter()
                .find(|d| d.network == Some(network) && d.tx_hash.as_deref() == Some(tx_hash.as_str())))
        }

        async fn update_status(&self, update: StatusUpdate) -> StorageResult<()> {
            let mut donations = self.donations.lock().unwrap();
            let donation = donations
                .iter_mut()
                .find(|d| d.id == update.id)
                .ok_or(StorageError::MissingRecord(update.id.0))?;
            donation.status = update.status;
            donation.tx_hash = update.tx_hash.or(donation.tx_hash.take());
            if let Some(confirmations) = update.confirmations {
                donation.confirmations = confirmations;
            }
            Ok(())
        }

        async fn find_pending(&self, _older_than: Option<DateTime<Utc>>) -> StorageResult<Vec<Donation>> {
            Ok(self
                .all()
                .into_iter()
                .filter(|d| d.status == DonationStatus::Pending)
                .collect())
        }

        async fn find_donation(&self, id: DonationId) -> StorageResult<Option<Donation>> {
            Ok(self.all().into_iter().find(|d| d.id == id))
        }
    }

    struct FixedPrices;

    #[async_trait]
    impl PriceFeed for FixedPrices {
        async fn get_prices(&self) -> Arc<PriceTable> {
            Arc::new(
                PriceTable::new(PriceSource::Live)
                    .with_price("BTC", 50_000.0)
                    .with_price("ETH", 2_000.0),
            )
        }
    }

    /// Serves a fixed transaction list, or fails every history request.
    struct ScriptedAdapter {
        network: Network,
        recent: Vec<ChainTransaction>,
        fail: bool,
        lookup: AdapterResult<Option<ChainTransaction>>,
        history_calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(network: Network, recent: Vec<ChainTransaction>) -> Self {
            Self {
                network,
                recent,
                fail: false,
                lookup: Ok(None),
                history_calls: AtomicUsize::new(0),
            }
        }

        fn failing(network: Network) -> Self {
            Self {
                fail: true,
                ..Self::new(network, Vec::new())
            }
        }
    }

    #[async_trait]
    impl NetworkAdapter for ScriptedAdapter {
        fn network(&self) -> Network {
            self.network
        }

        async fn fetch_wallet_snapshot(&self, _wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
            Err(AdapterError::RateLimited)
        }

        async fn fetch_recent_transactions(
            &self,
            _wallet: &WalletAddress,
            limit: usize,
        ) -> AdapterResult<Vec<ChainTransaction>> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AdapterError::Timeout("explorer did not answer".into()));
            }
            Ok(self.recent.iter().take(limit).cloned().collect())
        }

        async fn fetch_transaction_by_hash(
            &self,
            _hash: &str,
            _query: &TransferQuery,
        ) -> AdapterResult<Option<ChainTransaction>> {
            self.lookup.clone()
        }
    }

    fn incoming(network: Network, hash: &str, to: &str, confirmations: u32) -> ChainTransaction {
        ChainTransaction {
            network,
            hash: hash.into(),
            from_address: "donor".into(),
            to_address: to.into(),
            value: 0.01,
            token_symbol: None,
            block_height: 100,
            confirmations,
            timestamp: Utc::now(),
            status: TxStatus::Success,
            destination_tag: None,
        }
    }

    fn monitor(adapters: Vec<Arc<ScriptedAdapter>>, store: Arc<MemoryStore>) -> DonationMonitor {
        let registry = adapters.into_iter().fold(AdapterRegistry::new(), |registry, adapter| {
            registry.with_adapter(adapter)
        });
        DonationMonitor::new(
            Arc::new(registry),
            store,
            Arc::new(FixedPrices),
            [
                WalletAddress::new(Network::Bitcoin, BTC_WALLET),
                WalletAddress::new(Network::Ethereum, ETH_WALLET),
                WalletAddress::new(Network::Solana, ""),
            ],
        )
    }

    #[tokio::test]
    async fn failing_network_keeps_its_watermark() {
        let store = Arc::new(MemoryStore::default());
        let monitor = monitor(
            vec![
                Arc::new(ScriptedAdapter::failing(Network::Ethereum)),
                Arc::new(ScriptedAdapter::new(
                    Network::Bitcoin,
                    vec![incoming(Network::Bitcoin, "btc-1", BTC_WALLET, 2)],
                )),
            ],
            store.clone(),
        );

        let report = monitor.check_for_new_donations().await;

        assert_eq!(report.created, 1);
        assert_eq!(report.failed_networks, vec![Network::Ethereum]);
        let donations = store.all();
        assert_eq!(donations.len(), 1);
        assert_eq!(donations[0].network, Some(Network::Bitcoin));
        assert_eq!(donations[0].status, DonationStatus::Completed);
        assert_eq!(donations[0].amount_usd, 500.0);
        assert!(monitor.state().watermark(Network::Ethereum).is_none());
        assert_eq!(monitor.state().watermark(Network::Bitcoin), Some(report.started_at));
    }

    #[tokio::test]
    async fn repeated_checks_create_one_donation() {
        let store = Arc::new(MemoryStore::default());
        let monitor = monitor(
            vec![Arc::new(ScriptedAdapter::new(
                Network::Bitcoin,
                vec![
                    incoming(Network::Bitcoin, "btc-1", BTC_WALLET, 0),
                    incoming(Network::Bitcoin, "btc-out", "bc1qsomeoneelse", 3),
                ],
            ))],
            store.clone(),
        );

        let first = monitor.check_for_new_donations().await;
        monitor.state().reset_watermarks();
        let second = monitor.check_for_new_donations().await;

        assert_eq!(first.created, 1);
        assert_eq!(second.created, 0);
        assert_eq!(store.all().len(), 1);
        assert_eq!(store.all()[0].status, DonationStatus::Pending);
        assert_eq!(monitor.get_monitoring_status().processed_count, 1);
    }

    #[tokio::test]
    async fn store_error_fails_the_network_until_a_later_cycle() {
        let store = Arc::new(MemoryStore::default());
        store.fail_creates.store(true, Ordering::SeqCst);
        let monitor = monitor(
            vec![
                Arc::new(ScriptedAdapter::new(Network::Ethereum, Vec::new())),
                Arc::new(ScriptedAdapter::new(
                    Network::Bitcoin,
                    vec![incoming(Network::Bitcoin, "btc-1", BTC_WALLET, 2)],
                )),
            ],
            store.clone(),
        );

        let failed = monitor.check_for_new_donations().await;
        assert_eq!(failed.created, 0);
        assert_eq!(failed.failed_networks, vec![Network::Bitcoin]);
        assert!(monitor.state().watermark(Network::Bitcoin).is_none());
        assert!(monitor.state().watermark(Network::Ethereum).is_some());
        assert!(!monitor.state().processed().contains(Network::Bitcoin, "btc-1"));

        store.fail_creates.store(false, Ordering::SeqCst);
        let retried = monitor.check_for_new_donations().await;
        assert_eq!(retried.created, 1);
        assert!(retried.failed_networks.is_empty());
        assert_eq!(store.all().len(), 1);
        assert_eq!(store.all()[0].status, DonationStatus::Completed);
    }

    #[tokio::test]
    async fn fresh_monitor_leaves_settled_donations_untouched() {
        let store = Arc::new(MemoryStore::default());
        let refunded = store.seed(NewDonation {
            amount: 0.01,
            amount_usd: 500.0,
            currency: "BTC".into(),
            network: Some(Network::Bitcoin),
            status: DonationStatus::Refunded,
            tx_hash: Some("btc-1".into()),
            confirmations: 6,
            metadata: None,
            created_at: Utc::now() - chrono::Duration::hours(3),
        });
        let monitor = monitor(
            vec![
                Arc::new(ScriptedAdapter::new(Network::Ethereum, Vec::new())),
                Arc::new(ScriptedAdapter::new(
                    Network::Bitcoin,
                    vec![incoming(Network::Bitcoin, "btc-1", BTC_WALLET, 20)],
                )),
            ],
            store.clone(),
        );

        let report = monitor.check_for_new_donations().await;

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 1);
        assert!(report.failed_networks.is_empty());
        let donations = store.all();
        assert_eq!(donations.len(), 1);
        assert_eq!(donations[0].id, refunded);
        assert_eq!(donations[0].status, DonationStatus::Refunded);
    }

    #[tokio::test]
    async fn reconcile_completes_and_expires_pending_donations() {
        let store = Arc::new(MemoryStore::default());
        let crypto = |hash: &str, age_hours: i64| NewDonation {
            amount: 0.01,
            amount_usd: 500.0,
            currency: "BTC".into(),
            network: Some(Network::Bitcoin),
            status: DonationStatus::Pending,
            tx_hash: Some(hash.into()),
            confirmations: 0,
            metadata: Some(DonationMetadata::Crypto {
                network: Network::Bitcoin,
                wallet_address: BTC_WALLET.into(),
                from_address: None,
                destination_tag: None,
            }),
            created_at: Utc::now() - chrono::Duration::hours(age_hours),
        };
        let fresh = store.seed(crypto("confirmed", 1));
        let card = store.seed(NewDonation {
            metadata: Some(DonationMetadata::Card {
                processor: "paypal".into(),
                reference: "ref".into(),
            }),
            tx_hash: None,
            network: None,
            ..crypto("unused", 1)
        });

        let mut adapter = ScriptedAdapter::new(Network::Bitcoin, Vec::new());
        adapter.lookup = Ok(Some(incoming(Network::Bitcoin, "confirmed", BTC_WALLET, 3)));
        let monitor = monitor(vec![Arc::new(adapter)], store.clone());
        let report = monitor.reconcile_pending().await.unwrap();
        assert_eq!(report, ReconcileReport { completed: 1, failed: 0, unchanged: 1 });

        let stale = store.seed(crypto("vanished", 48));
        let recent = store.seed(crypto("lagging", 2));
        let monitor = monitor_with_lookup(Ok(None), store.clone());
        let report = monitor.reconcile_pending().await.unwrap();
        assert_eq!(report.failed, 1);

        let status = |id: DonationId| store.all().into_iter().find(|d| d.id == id).unwrap().status;
        assert_eq!(status(fresh), DonationStatus::Completed);
        assert_eq!(status(card), DonationStatus::Pending);
        assert_eq!(status(stale), DonationStatus::Failed);
        assert_eq!(status(recent), DonationStatus::Pending);
    }

    fn monitor_with_lookup(
        lookup: AdapterResult<Option<ChainTransaction>>,
        store: Arc<MemoryStore>,
    ) -> DonationMonitor {
        let mut adapter = ScriptedAdapter::new(Network::Bitcoin, Vec::new());
        adapter.lookup = lookup;
        monitor(vec![Arc::new(adapter)], store)
    }

    #[tokio::test]
    async fn provider_outage_leaves_pending_donations_alone() {
        let store = Arc::new(MemoryStore::default());
        let id = store.seed(NewDonation {
            amount: 0.01,
            amount_usd: 500.0,
            currency: "BTC".into(),
            network: Some(Network::Bitcoin),
            status: DonationStatus::Pending,
            tx_hash: Some("old".into()),
            confirmations: 0,
            metadata: Some(DonationMetadata::Crypto {
                network: Network::Bitcoin,
                wallet_address: BTC_WALLET.into(),
                from_address: None,
                destination_tag: None,
            }),
            created_at: Utc::now() - chrono::Duration::days(3),
        });

        let monitor = monitor_with_lookup(Err(AdapterError::RateLimited), store.clone());
        let report = monitor.reconcile_pending().await.unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(store.find_donation(id).await.unwrap().unwrap().status, DonationStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_immediately_then_on_interval() {
        let store = Arc::new(MemoryStore::default());
        let adapter = Arc::new(ScriptedAdapter::new(Network::Bitcoin, Vec::new()));
        let monitor = monitor(vec![adapter.clone()], store);

        monitor.start_monitoring(5).unwrap();
        assert!(matches!(monitor.start_monitoring(5), Err(MonitorError::AlreadyRunning)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(adapter.history_calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.get_monitoring_status().interval_minutes, Some(5));

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(adapter.history_calls.load(Ordering::SeqCst), 2);

        assert!(monitor.stop_monitoring());
        assert!(!monitor.stop_monitoring());
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(adapter.history_calls.load(Ordering::SeqCst), 2);
        assert!(!monitor.get_monitoring_status().running);
    }
}
