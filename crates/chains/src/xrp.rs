//! XRP Ledger adapter over rippled's JSON-RPC (HTTP) interface.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use donation_watch_domain::{
    parse_decimal_units, scale_units, ChainTransaction, Network, TokenBalance, TxStatus,
    WalletAddress, WalletSnapshot,
};

use crate::{
    adapter::{unix_time, unsupported, NetworkAdapter, TransferQuery},
    error::{AdapterError, AdapterResult},
    http::HttpClient,
};

/// Seconds between the Unix epoch and the Ripple epoch (2000-01-01).
const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;

#[derive(Debug, Deserialize)]
struct RippledEnvelope {
    result: Value,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    account_data: AccountData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountData {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct AccountTx {
    #[serde(default)]
    transactions: Vec<AccountTxEntry>,
}

#[derive(Debug, Deserialize)]
struct AccountTxEntry {
    tx: LedgerTx,
    #[serde(default)]
    meta: Option<TxMeta>,
    #[serde(default)]
    validated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LedgerTx {
    #[serde(default)]
    account: String,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    destination_tag: Option<u32>,
    #[serde(default)]
    transaction_type: String,
    #[serde(rename = "hash")]
    hash: String,
    #[serde(default, rename = "ledger_index")]
    ledger_index: Option<u64>,
    #[serde(default, rename = "date")]
    date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TxMeta {
    #[serde(default, rename = "TransactionResult")]
    transaction_result: String,
    #[serde(default)]
    delivered_amount: Option<Value>,
}

/// Shape of the `tx` method: transaction fields at the top level.
#[derive(Debug, Deserialize)]
struct TxLookup {
    #[serde(flatten)]
    tx: LedgerTx,
    #[serde(default)]
    meta: Option<TxMeta>,
    #[serde(default)]
    validated: bool,
}

pub struct XrpAdapter {
    http: Arc<HttpClient>,
    rpc_url: String,
}

impl XrpAdapter {
    pub fn new(http: Arc<HttpClient>, rpc_url: &str) -> Self {
        Self {
            http,
            rpc_url: rpc_url.trim().to_string(),
        }
    }

    /// Calls a rippled method. Returns `Ok(None)` for the "does not exist"
    /// error codes.
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> AdapterResult<Option<T>> {
        let body = json!({ "method": method, "params": [params] });
        let envelope: RippledEnvelope = self.http.post_json(&self.rpc_url, &body).await?;
        let result = envelope.result;
        if result.get("status").and_then(Value::as_str) == Some("error") {
            let code = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return match code.as_str() {
                "actNotFound" | "txnNotFound" => Ok(None),
                "slowDown" => Err(AdapterError::RateLimited),
                _ => Err(AdapterError::Rpc {
                    code: result
                        .get("error_code")
                        .and_then(Value::as_i64)
                        .unwrap_or_default(),
                    message: code,
                }),
            };
        }
        Ok(Some(serde_json::from_value(result)?))
    }
}

/// XRP amounts are strings of drops; issued currencies are objects.
fn xrp_drops(amount: Option<&Value>) -> AdapterResult<Option<u128>> {
    match amount {
        Some(Value::String(drops)) => Ok(Some(parse_decimal_units(drops)?)),
        _ => Ok(None),
    }
}

/// rippled reports `delivered_amount: "unavailable"` for payments from before
/// the field existed; only a drop count or an issued-currency object counts.
fn reported(amount: &&Value) -> bool {
    match amount {
        Value::String(drops) => drops.trim().parse::<u128>().is_ok(),
        _ => true,
    }
}

fn normalize(
    tx: LedgerTx,
    meta: Option<TxMeta>,
    validated: bool,
) -> AdapterResult<Option<ChainTransaction>> {
    if tx.transaction_type != "Payment" {
        return Ok(None);
    }
    let delivered = meta
        .as_ref()
        .and_then(|m| m.delivered_amount.as_ref())
        .filter(reported);
    let Some(drops) = xrp_drops(delivered.or(tx.amount.as_ref()))? else {
        return Ok(None);
    };
    let status = match (validated, meta.as_ref().map(|m| m.transaction_result.as_str())) {
        (false, _) => TxStatus::Pending,
        (true, Some("tesSUCCESS")) => TxStatus::Success,
        (true, _) => TxStatus::Failed,
    };

    Ok(Some(ChainTransaction {
        network: Network::Xrp,
        hash: tx.hash,
        from_address: tx.account,
        to_address: tx.destination.unwrap_or_default(),
        value: scale_units(drops, Network::Xrp.native_decimals()),
        token_symbol: None,
        block_height: tx.ledger_index.unwrap_or_default(),
        confirmations: u32::from(validated),
        timestamp: tx
            .date
            .map(|d| unix_time(d + RIPPLE_EPOCH_OFFSET))
            .unwrap_or_else(Utc::now),
        status,
        destination_tag: tx.destination_tag,
    }))
}

#[async_trait]
impl NetworkAdapter for XrpAdapter {
    fn network(&self) -> Network {
        Network::Xrp
    }

    async fn fetch_wallet_snapshot(&self, wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
        let info: Option<AccountInfo> = self
            .request(
                "account_info",
                json!({ "account": wallet.address, "ledger_index": "validated" }),
            )
            .await?;
        // Unfunded accounts do not exist on the ledger yet.
        let drops = match info {
            Some(info) => parse_decimal_units(&info.account_data.balance)?,
            None => 0,
        };
        let decimals = Network::Xrp.native_decimals();

        Ok(WalletSnapshot {
            address: wallet.address.clone(),
            network: Network::Xrp,
            balances: vec![TokenBalance {
                symbol: "XRP".into(),
                name: "XRP".into(),
                balance: scale_units(drops, decimals),
                usd_value: 0.0,
                contract_address: None,
                decimals,
            }],
            total_usd_value: 0.0,
            transaction_count: None,
        })
    }

    async fn fetch_recent_transactions(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>> {
        let page: Option<AccountTx> = self
            .request(
                "account_tx",
                json!({
                    "account": wallet.address,
                    "ledger_index_min": -1,
                    "ledger_index_max": -1,
                    "limit": limit,
                }),
            )
            .await?;
        let mut transactions = Vec::new();
        for entry in page.map(|p| p.transactions).unwrap_or_default() {
            if let Some(tx) = normalize(entry.tx, entry.meta, entry.validated)? {
                transactions.push(tx);
            }
        }
        transactions.truncate(limit);
        Ok(transactions)
    }

    async fn fetch_transaction_by_hash(
        &self,
        hash: &str,
        query: &TransferQuery,
    ) -> AdapterResult<Option<ChainTransaction>> {
        if !query.is_native(Network::Xrp) {
            return Err(unsupported(Network::Xrp, &query.currency));
        }
        let lookup: Option<TxLookup> = self
            .request("tx", json!({ "transaction": hash.trim(), "binary": false }))
            .await?;
        let Some(lookup) = lookup else {
            return Ok(None);
        };
        match normalize(lookup.tx, lookup.meta, lookup.validated)? {
            Some(tx) => Ok(Some(tx)),
            None => Err(AdapterError::not_decoded(hash, &query.currency)),
        }
    }
}
