use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;

use donation_watch_domain::{BootstrapConfig, ChainTransaction, Network, WalletAddress, WalletSnapshot};

use crate::{
    bitcoin::BitcoinAdapter,
    error::{AdapterError, AdapterResult},
    evm::{EvmAdapter, ExplorerApi},
    http::HttpClient,
    solana::SolanaAdapter,
    tron::TronAdapter,
    xrp::XrpAdapter,
};

/// What a hash lookup should decode: which asset and, for transactions with
/// several outputs or transfers, which recipient to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQuery {
    pub currency: String,
    pub recipient: Option<String>,
}

impl TransferQuery {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into().trim().to_ascii_uppercase(),
            recipient: None,
        }
    }

    pub fn native(network: Network) -> Self {
        Self::new(network.native_symbol())
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into().trim().to_string());
        self
    }

    pub fn is_native(&self, network: Network) -> bool {
        network.is_native(&self.currency)
    }
}

/// Chain-specific client producing normalized wallet and transaction data.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    fn network(&self) -> Network;

    /// Balances of the chain's native coin and known tokens. USD values are
    /// left at zero; callers price them.
    async fn fetch_wallet_snapshot(&self, wallet: &WalletAddress) -> AdapterResult<WalletSnapshot>;

    /// Most recent transactions touching `wallet`, newest first.
    async fn fetch_recent_transactions(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>>;

    /// `Ok(None)` when the provider does not know the hash.
    async fn fetch_transaction_by_hash(
        &self,
        hash: &str,
        query: &TransferQuery,
    ) -> AdapterResult<Option<ChainTransaction>>;
}

/// Counts every adapter call by network and outcome.
struct Instrumented {
    inner: Arc<dyn NetworkAdapter>,
}

fn record<T>(network: Network, result: &AdapterResult<T>, found: impl FnOnce(&T) -> bool) {
    let outcome = match result {
        Ok(value) if found(value) => "ok",
        Ok(_) => "not_found",
        Err(_) => "error",
    };
    counter!("chain_requests_total", "network" => network.to_string(), "result" => outcome)
        .increment(1);
}

#[async_trait]
impl NetworkAdapter for Instrumented {
    fn network(&self) -> Network {
        self.inner.network()
    }

    async fn fetch_wallet_snapshot(&self, wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
        let result = self.inner.fetch_wallet_snapshot(wallet).await;
        record(self.network(), &result, |_| true);
        result
    }

    async fn fetch_recent_transactions(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>> {
        let result = self.inner.fetch_recent_transactions(wallet, limit).await;
        record(self.network(), &result, |_| true);
        result
    }

    async fn fetch_transaction_by_hash(
        &self,
        hash: &str,
        query: &TransferQuery,
    ) -> AdapterResult<Option<ChainTransaction>> {
        let result = self.inner.fetch_transaction_by_hash(hash, query).await;
        record(self.network(), &result, Option::is_some);
        result
    }
}

/// One adapter per network, shared by the verifier, the aggregator and the
/// monitor.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<Network, Arc<dyn NetworkAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the six production adapters over one shared HTTP client.
    pub fn from_config(config: &BootstrapConfig) -> AdapterResult<Self> {
        let http = Arc::new(HttpClient::new(config.http_timeout())?);
        let endpoints = config.endpoints();
        let keys = config.api_keys();

        let ethereum_explorer = keys
            .etherscan
            .as_ref()
            .map(|key| ExplorerApi::new(&endpoints.etherscan_api_url, key));
        let bsc_explorer = keys
            .bscscan
            .as_ref()
            .map(|key| ExplorerApi::new(&endpoints.bscscan_api_url, key));

        Ok(Self::new()
            .with_adapter(Arc::new(BitcoinAdapter::new(
                http.clone(),
                &endpoints.bitcoin_api_url,
            )))
            .with_adapter(Arc::new(EvmAdapter::new(
                Network::Ethereum,
                http.clone(),
                &endpoints.ethereum_rpc_url,
                ethereum_explorer,
            )))
            .with_adapter(Arc::new(EvmAdapter::new(
                Network::Bsc,
                http.clone(),
                &endpoints.bsc_rpc_url,
                bsc_explorer,
            )))
            .with_adapter(Arc::new(XrpAdapter::new(http.clone(), &endpoints.xrp_rpc_url)))
            .with_adapter(Arc::new(SolanaAdapter::new(
                http.clone(),
                &endpoints.solana_rpc_url,
            )))
            .with_adapter(Arc::new(TronAdapter::new(
                http,
                &endpoints.tron_api_url,
                keys.trongrid.clone(),
            ))))
    }

    /// Registers `adapter` for its network, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn NetworkAdapter>) -> Self {
        let network = adapter.network();
        self.adapters
            .insert(network, Arc::new(Instrumented { inner: adapter }));
        self
    }

    pub fn get(&self, network: Network) -> Option<Arc<dyn NetworkAdapter>> {
        self.adapters.get(&network).cloned()
    }

    pub fn networks(&self) -> impl Iterator<Item = Network> + '_ {
        self.adapters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Unix seconds to UTC; out-of-range values collapse to the epoch.
pub(crate) fn unix_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Shorthand for adapters that reject assets they cannot decode.
pub(crate) fn unsupported(network: Network, currency: &str) -> AdapterError {
    AdapterError::UnsupportedAsset {
        network,
        currency: currency.to_string(),
    }
}
