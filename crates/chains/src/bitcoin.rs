//! Bitcoin adapter over an Esplora-compatible REST API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use donation_watch_domain::{
    scale_units, ChainTransaction, Network, TokenBalance, TxStatus, WalletAddress, WalletSnapshot,
};

use crate::{
    adapter::{unix_time, unsupported, NetworkAdapter, TransferQuery},
    error::AdapterResult,
    http::HttpClient,
};

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: AddressStats,
    #[serde(default)]
    mempool_stats: AddressStats,
}

#[derive(Debug, Default, Deserialize)]
struct AddressStats {
    #[serde(default)]
    funded_txo_sum: u64,
    #[serde(default)]
    spent_txo_sum: u64,
    #[serde(default)]
    tx_count: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    #[serde(default)]
    vin: Vec<Input>,
    #[serde(default)]
    vout: Vec<Output>,
    status: TxConfirmation,
}

#[derive(Debug, Deserialize)]
struct Input {
    #[serde(default)]
    prevout: Option<Output>,
}

#[derive(Debug, Clone, Deserialize)]
struct Output {
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct TxConfirmation {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    block_time: Option<i64>,
}

pub struct BitcoinAdapter {
    http: Arc<HttpClient>,
    base_url: String,
}

impl BitcoinAdapter {
    pub fn new(http: Arc<HttpClient>, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn tip_height(&self) -> AdapterResult<u64> {
        self.http
            .get_json(&format!("{}/blocks/tip/height", self.base_url))
            .await
    }
}

/// Normalizes an Esplora transaction. With a `focus` address that receives an
/// output (and did not fund the transaction) the result reports the sum paid
/// to it; otherwise it reports the first output not returning change.
fn normalize(tx: EsploraTx, focus: Option<&str>, tip: u64) -> ChainTransaction {
    let from_address = tx
        .vin
        .iter()
        .find_map(|input| input.prevout.as_ref()?.scriptpubkey_address.clone())
        .unwrap_or_default();
    let funded_by_focus = focus.map_or(false, |addr| {
        tx.vin.iter().any(|input| {
            input
                .prevout
                .as_ref()
                .and_then(|p| p.scriptpubkey_address.as_deref())
                == Some(addr)
        })
    });

    let paid_to = |addr: &str| -> u64 {
        tx.vout
            .iter()
            .filter(|o| o.scriptpubkey_address.as_deref() == Some(addr))
            .map(|o| o.value)
            .sum()
    };

    let (to_address, sats) = match focus {
        Some(addr) if !funded_by_focus && paid_to(addr) > 0 => (addr.to_string(), paid_to(addr)),
        _ => {
            let payee = tx
                .vout
                .iter()
                .find(|o| {
                    o.scriptpubkey_address.is_some()
                        && o.scriptpubkey_address.as_deref() != Some(from_address.as_str())
                })
                .or_else(|| tx.vout.first());
            match payee {
                Some(output) => (
                    output.scriptpubkey_address.clone().unwrap_or_default(),
                    output.value,
                ),
                None => (String::new(), 0),
            }
        }
    };

    let (block_height, confirmations, status) = match (tx.status.confirmed, tx.status.block_height) {
        (true, Some(height)) => (
            height,
            u32::try_from(tip.saturating_sub(height) + 1).unwrap_or(u32::MAX),
            TxStatus::Success,
        ),
        _ => (0, 0, TxStatus::Pending),
    };

    ChainTransaction {
        network: Network::Bitcoin,
        hash: tx.txid,
        from_address,
        to_address,
        value: scale_units(u128::from(sats), Network::Bitcoin.native_decimals()),
        token_symbol: None,
        block_height,
        confirmations,
        timestamp: tx.status.block_time.map(unix_time).unwrap_or_else(Utc::now),
        status,
        destination_tag: None,
    }
}

#[async_trait]
impl NetworkAdapter for BitcoinAdapter {
    fn network(&self) -> Network {
        Network::Bitcoin
    }

    async fn fetch_wallet_snapshot(&self, wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
        let info: AddressInfo = self
            .http
            .get_json(&format!("{}/address/{}", self.base_url, wallet.address))
            .await?;
        let funded = info.chain_stats.funded_txo_sum + info.mempool_stats.funded_txo_sum;
        let spent = info.chain_stats.spent_txo_sum + info.mempool_stats.spent_txo_sum;
        let decimals = Network::Bitcoin.native_decimals();

        Ok(WalletSnapshot {
            address: wallet.address.clone(),
            network: Network::Bitcoin,
            balances: vec![TokenBalance {
                symbol: "BTC".into(),
                name: "Bitcoin".into(),
                balance: scale_units(u128::from(funded.saturating_sub(spent)), decimals),
                usd_value: 0.0,
                contract_address: None,
                decimals,
            }],
            total_usd_value: 0.0,
            transaction_count: Some(info.chain_stats.tx_count + info.mempool_stats.tx_count),
        })
    }

    async fn fetch_recent_transactions(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>> {
        let txs: Vec<EsploraTx> = self
            .http
            .get_json(&format!("{}/address/{}/txs", self.base_url, wallet.address))
            .await?;
        let tip = self.tip_height().await?;
        Ok(txs
            .into_iter()
            .take(limit)
            .map(|tx| normalize(tx, Some(&wallet.address), tip))
            .collect())
    }

    async fn fetch_transaction_by_hash(
        &self,
        hash: &str,
        query: &TransferQuery,
    ) -> AdapterResult<Option<ChainTransaction>> {
        if !query.is_native(Network::Bitcoin) {
            return Err(unsupported(Network::Bitcoin, &query.currency));
        }
        let request = self
            .http
            .get(&format!("{}/tx/{}", self.base_url, hash.trim()));
        let Some(tx) = self.http.send_json_opt::<EsploraTx>(request).await? else {
            return Ok(None);
        };
        let tip = self.tip_height().await?;
        Ok(Some(normalize(tx, query.recipient.as_deref(), tip)))
    }
}
