use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use donation_watch_domain::{Network, PriceSource, WalletAddress, WalletSnapshot};

use crate::{adapter::AdapterRegistry, error::AdapterError, prices::PriceFeed};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no donation address configured for {0}")]
    MissingAddress(Network),
    #[error("no adapter registered for {0}")]
    UnsupportedNetwork(Network),
    #[error("{network} adapter failed: {source}")]
    Adapter {
        network: Network,
        #[source]
        source: AdapterError,
    },
}

/// Priced view over every configured donation wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub wallets: Vec<WalletSnapshot>,
    pub total_usd_value: f64,
    /// Networks whose adapter failed during this refresh.
    pub failed_networks: Vec<Network>,
    pub prices_source: PriceSource,
}

pub struct WalletAggregator {
    registry: Arc<AdapterRegistry>,
    prices: Arc<dyn PriceFeed>,
    wallets: Vec<WalletAddress>,
}

impl WalletAggregator {
    /// Unconfigured wallets are dropped.
    pub fn new(
        registry: Arc<AdapterRegistry>,
        prices: Arc<dyn PriceFeed>,
        wallets: impl IntoIterator<Item = WalletAddress>,
    ) -> Self {
        Self {
            registry,
            prices,
            wallets: wallets.into_iter().filter(WalletAddress::is_configured).collect(),
        }
    }

    pub fn wallets(&self) -> &[WalletAddress] {
        &self.wallets
    }

    async fn snapshot(&self, wallet: &WalletAddress) -> Result<WalletSnapshot, AggregateError> {
        let adapter = self
            .registry
            .get(wallet.network)
            .ok_or(AggregateError::UnsupportedNetwork(wallet.network))?;
        adapter
            .fetch_wallet_snapshot(wallet)
            .await
            .map_err(|source| AggregateError::Adapter {
                network: wallet.network,
                source,
            })
    }

    /// Refreshes all wallets concurrently. A failing network is reported in
    /// `failed_networks` and does not affect the others.
    pub async fn refresh_all_wallets(&self) -> Portfolio {
        let results = join_all(self.wallets.iter().map(|wallet| self.snapshot(wallet))).await;
        let prices = self.prices.get_prices().await;

        let mut wallets = Vec::with_capacity(results.len());
        let mut failed_networks = Vec::new();
        for (wallet, result) in self.wallets.iter().zip(results) {
            match result {
                Ok(mut snapshot) => {
                    snapshot.apply_prices(&prices);
                    wallets.push(snapshot);
                }
                Err(err) => {
                    warn!(network = %wallet.network, %err, "wallet refresh failed");
                    failed_networks.push(wallet.network);
                }
            }
        }

        Portfolio {
            total_usd_value: wallets.iter().map(|w| w.total_usd_value).sum(),
            wallets,
            failed_networks,
            prices_source: prices.source,
        }
    }

    /// Refreshes and prices one network's wallet.
    pub async fn fetch_wallet(&self, network: Network) -> Result<WalletSnapshot, AggregateError> {
        let wallet = self
            .wallets
            .iter()
            .find(|w| w.network == network)
            .ok_or(AggregateError::MissingAddress(network))?;
        let mut snapshot = self.snapshot(wallet).await?;
        snapshot.apply_prices(&*self.prices.get_prices().await);
        Ok(snapshot)
    }
}
