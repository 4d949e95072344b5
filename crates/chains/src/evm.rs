//! Ethereum and BSC adapter.
//!
//! Reads go through a JSON-RPC endpoint, or through the explorer's
//! `module=proxy` gateway when an explorer API key is configured. Recent
//! history uses the explorer's account endpoints when a key is present and
//! falls back to an `eth_getLogs` scan of token transfers otherwise.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use donation_watch_domain::{
    parse_decimal_units, parse_hex_quantity,
    policy::{self, TokenContract, EVM_LOG_LOOKBACK_BLOCKS},
    scale_units, ChainTransaction, Network, TokenBalance, TxStatus, WalletAddress, WalletSnapshot,
};

use crate::{
    abi::{self, TRANSFER_EVENT_TOPIC},
    adapter::{unix_time, unsupported, NetworkAdapter, TransferQuery},
    error::{AdapterError, AdapterResult},
    http::{HttpClient, JsonRpcResponse},
};

/// Etherscan-family explorer credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerApi {
    base_url: String,
    api_key: String,
}

impl ExplorerApi {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    from: String,
    #[serde(default)]
    to: Option<String>,
    value: String,
    #[serde(default)]
    input: String,
    #[serde(default)]
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

/// Envelope of the explorer's non-proxy endpoints.
#[derive(Debug, Deserialize)]
struct ExplorerEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerTx {
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    block_number: String,
    time_stamp: String,
    #[serde(default)]
    confirmations: String,
    #[serde(default)]
    is_error: String,
    #[serde(default)]
    contract_address: String,
    #[serde(default)]
    token_decimal: Option<String>,
}

pub struct EvmAdapter {
    network: Network,
    http: Arc<HttpClient>,
    rpc_url: String,
    explorer: Option<ExplorerApi>,
    native_gap_warned: AtomicBool,
}

impl EvmAdapter {
    pub fn new(
        network: Network,
        http: Arc<HttpClient>,
        rpc_url: &str,
        explorer: Option<ExplorerApi>,
    ) -> Self {
        Self {
            network,
            http,
            rpc_url: rpc_url.trim().to_string(),
            explorer,
            native_gap_warned: AtomicBool::new(false),
        }
    }

    /// The log scan only sees token `Transfer` events. Returns `true` on the
    /// call that emitted the warning.
    fn warn_native_gap_once(&self) -> bool {
        if self.native_gap_warned.swap(true, Ordering::Relaxed) {
            return false;
        }
        warn!(
            network = %self.network,
            key = self.key_var(),
            "no explorer key, native {} donations will not be discovered",
            self.network.native_symbol()
        );
        true
    }

    fn key_var(&self) -> &'static str {
        match self.network {
            Network::Bsc => "BSCSCAN_API_KEY",
            _ => "ETHERSCAN_API_KEY",
        }
    }

    /// Issues `method` over JSON-RPC, or over the explorer proxy using
    /// `proxy_args` as query parameters.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        proxy_args: &[(&str, String)],
    ) -> AdapterResult<T> {
        if let Some(explorer) = &self.explorer {
            let mut query: Vec<(&str, String)> = vec![
                ("module", "proxy".to_string()),
                ("action", method.to_string()),
            ];
            query.extend(proxy_args.iter().cloned());
            query.push(("apikey", explorer.api_key.clone()));
            let body: Value = self
                .http
                .send_json(self.http.get(&explorer.base_url).query(&query))
                .await?;
            return parse_proxy_body(body);
        }
        if self.rpc_url.is_empty() {
            return Err(AdapterError::MissingApiKey(self.key_var()));
        }
        self.http.json_rpc(&self.rpc_url, method, params).await
    }

    async fn block_number(&self) -> AdapterResult<u64> {
        let hex: String = self.call("eth_blockNumber", json!([]), &[]).await?;
        Ok(u64::try_from(parse_hex_quantity(&hex)?).unwrap_or(u64::MAX))
    }

    async fn transaction(&self, hash: &str) -> AdapterResult<Option<RpcTransaction>> {
        self.call(
            "eth_getTransactionByHash",
            json!([hash]),
            &[("txhash", hash.to_string())],
        )
        .await
    }

    async fn receipt(&self, hash: &str) -> AdapterResult<Option<RpcReceipt>> {
        self.call(
            "eth_getTransactionReceipt",
            json!([hash]),
            &[("txhash", hash.to_string())],
        )
        .await
    }

    async fn block_timestamp(&self, number: u64) -> AdapterResult<i64> {
        let tag = format!("0x{number:x}");
        let block: Option<RpcBlock> = self
            .call(
                "eth_getBlockByNumber",
                json!([tag, false]),
                &[("tag", tag.clone()), ("boolean", "false".to_string())],
            )
            .await?;
        let block = block.ok_or_else(|| AdapterError::malformed(format!("block {number} missing")))?;
        Ok(i64::try_from(parse_hex_quantity(&block.timestamp)?).unwrap_or_default())
    }

    async fn native_balance(&self, address: &str) -> AdapterResult<u128> {
        if let Some(explorer) = &self.explorer {
            let query = [
                ("module", "account"),
                ("action", "balance"),
                ("address", address),
                ("tag", "latest"),
                ("apikey", explorer.api_key.as_str()),
            ];
            let envelope: ExplorerEnvelope = self
                .http
                .send_json(self.http.get(&explorer.base_url).query(&query))
                .await?;
            let raw: String = explorer_result(envelope)?
                .ok_or_else(|| AdapterError::malformed("balance result missing"))?;
            return Ok(parse_decimal_units(&raw)?);
        }
        let hex: String = self
            .call("eth_getBalance", json!([address, "latest"]), &[])
            .await?;
        Ok(parse_hex_quantity(&hex)?)
    }

    async fn token_balance(&self, token: &TokenContract, owner: &str) -> AdapterResult<u128> {
        let data = abi::encode_balance_of(owner);
        let hex: String = self
            .call(
                "eth_call",
                json!([{ "to": token.contract, "data": data }, "latest"]),
                &[
                    ("to", token.contract.to_string()),
                    ("data", data.clone()),
                    ("tag", "latest".to_string()),
                ],
            )
            .await?;
        Ok(parse_hex_quantity(&hex)?)
    }

    async fn transaction_count(&self, address: &str) -> AdapterResult<u64> {
        let hex: String = self
            .call(
                "eth_getTransactionCount",
                json!([address, "latest"]),
                &[
                    ("address", address.to_string()),
                    ("tag", "latest".to_string()),
                ],
            )
            .await?;
        Ok(u64::try_from(parse_hex_quantity(&hex)?).unwrap_or(u64::MAX))
    }

    async fn explorer_history(
        &self,
        explorer: &ExplorerApi,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>> {
        let mut history = Vec::new();
        for action in ["txlist", "tokentx"] {
            let offset = limit.to_string();
            let query = [
                ("module", "account"),
                ("action", action),
                ("address", wallet.address.as_str()),
                ("page", "1"),
                ("offset", offset.as_str()),
                ("sort", "desc"),
                ("apikey", explorer.api_key.as_str()),
            ];
            let envelope: ExplorerEnvelope = self
                .http
                .send_json(self.http.get(&explorer.base_url).query(&query))
                .await?;
            let rows: Vec<ExplorerTx> = explorer_result(envelope)?.unwrap_or_default();
            for row in rows {
                let token = if action == "tokentx" {
                    match policy::token_by_contract(self.network, &row.contract_address) {
                        Some(token) => Some(token),
                        None => continue,
                    }
                } else {
                    None
                };
                history.push(self.explorer_row(row, token)?);
            }
        }
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history.truncate(limit);
        Ok(history)
    }

    fn explorer_row(
        &self,
        row: ExplorerTx,
        token: Option<&TokenContract>,
    ) -> AdapterResult<ChainTransaction> {
        let decimals = match token {
            Some(token) => row
                .token_decimal
                .as_deref()
                .and_then(|d| d.parse().ok())
                .unwrap_or(token.decimals),
            None => self.network.native_decimals(),
        };
        let confirmations = row.confirmations.parse::<u64>().unwrap_or_default();
        Ok(ChainTransaction {
            network: self.network,
            hash: row.hash,
            from_address: row.from.to_ascii_lowercase(),
            to_address: row.to.to_ascii_lowercase(),
            value: scale_units(parse_decimal_units(&row.value)?, decimals),
            token_symbol: token.map(|t| t.symbol.to_string()),
            block_height: row.block_number.parse().unwrap_or_default(),
            confirmations: u32::try_from(confirmations).unwrap_or(u32::MAX),
            timestamp: unix_time(row.time_stamp.parse().unwrap_or_default()),
            status: if row.is_error == "1" {
                TxStatus::Failed
            } else {
                TxStatus::Success
            },
            destination_tag: None,
        })
    }

    /// Token transfers addressed to `wallet` within the look-back window.
    async fn log_history(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>> {
        let latest = self.block_number().await?;
        let from_block = latest.saturating_sub(EVM_LOG_LOOKBACK_BLOCKS);
        let contracts: Vec<&str> = policy::tokens_for(self.network).map(|t| t.contract).collect();
        let filter = json!([{
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": "latest",
            "address": contracts,
            "topics": [TRANSFER_EVENT_TOPIC.as_str(), Value::Null, abi::address_to_word(&wallet.address)],
        }]);
        let mut logs: Vec<RpcLog> = self.http.json_rpc(&self.rpc_url, "eth_getLogs", filter).await?;
        logs.reverse();
        logs.truncate(limit);

        let mut heights: Vec<u64> = logs
            .iter()
            .filter_map(|log| log.block_number.as_deref())
            .filter_map(|n| parse_hex_quantity(n).ok())
            .filter_map(|n| u64::try_from(n).ok())
            .collect();
        heights.sort_unstable();
        heights.dedup();
        let stamps = join_all(heights.iter().map(|h| self.block_timestamp(*h))).await;
        let mut timestamps = HashMap::new();
        for (height, stamp) in heights.into_iter().zip(stamps) {
            timestamps.insert(height, stamp?);
        }

        let mut history = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(token) = policy::token_by_contract(self.network, &log.address) else {
                continue;
            };
            let decoded = match abi::decode_transfer_log(&log.address, &log.topics, &log.data) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(network = %self.network, ?err, "skipping undecodable transfer log");
                    continue;
                }
            };
            let height = log
                .block_number
                .as_deref()
                .and_then(|n| parse_hex_quantity(n).ok())
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or_default();
            history.push(ChainTransaction {
                network: self.network,
                hash: log.transaction_hash.unwrap_or_default(),
                from_address: decoded.from,
                to_address: decoded.to,
                value: scale_units(decoded.raw_amount, token.decimals),
                token_symbol: Some(token.symbol.to_string()),
                block_height: height,
                confirmations: confirmations(latest, Some(height)),
                timestamp: timestamps
                    .get(&height)
                    .copied()
                    .map(unix_time)
                    .unwrap_or_else(Utc::now),
                status: TxStatus::Success,
                destination_tag: None,
            });
        }
        Ok(history)
    }
}

fn confirmations(latest: u64, block: Option<u64>) -> u32 {
    match block {
        Some(block) if latest >= block => u32::try_from(latest - block + 1).unwrap_or(u32::MAX),
        _ => 0,
    }
}

/// Decodes a `module=proxy` answer: a JSON-RPC envelope on success, an
/// explorer envelope with `status: "0"` on failure.
fn parse_proxy_body<T: DeserializeOwned>(body: Value) -> AdapterResult<T> {
    if body.get("status").and_then(Value::as_str) == Some("0") {
        let envelope: ExplorerEnvelope = serde_json::from_value(body)?;
        return Err(explorer_failure(&envelope));
    }
    let response: JsonRpcResponse = serde_json::from_value(body)?;
    response.into_result()
}

fn explorer_failure(envelope: &ExplorerEnvelope) -> AdapterError {
    let detail = envelope
        .result
        .as_str()
        .unwrap_or(envelope.message.as_str())
        .to_string();
    if detail.to_ascii_lowercase().contains("rate limit") {
        AdapterError::RateLimited
    } else {
        AdapterError::Rpc {
            code: 0,
            message: detail,
        }
    }
}

/// `status: "0"` with an empty list just means "no records".
fn explorer_result<T: DeserializeOwned>(envelope: ExplorerEnvelope) -> AdapterResult<Option<T>> {
    if envelope.status == "1" {
        return Ok(Some(serde_json::from_value(envelope.result)?));
    }
    match &envelope.result {
        Value::Array(items) if items.is_empty() => Ok(None),
        _ if envelope.message.starts_with("No transactions") => Ok(None),
        _ => Err(explorer_failure(&envelope)),
    }
}

#[async_trait]
impl NetworkAdapter for EvmAdapter {
    fn network(&self) -> Network {
        self.network
    }

    async fn fetch_wallet_snapshot(&self, wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
        let decimals = self.network.native_decimals();
        let native = self.native_balance(&wallet.address).await?;
        let mut balances = vec![TokenBalance {
            symbol: self.network.native_symbol().to_string(),
            name: match self.network {
                Network::Bsc => "BNB".to_string(),
                _ => "Ether".to_string(),
            },
            balance: scale_units(native, decimals),
            usd_value: 0.0,
            contract_address: None,
            decimals,
        }];

        for token in policy::tokens_for(self.network) {
            let raw = self.token_balance(token, &wallet.address).await?;
            if raw == 0 {
                continue;
            }
            balances.push(TokenBalance {
                symbol: token.symbol.to_string(),
                name: token.name.to_string(),
                balance: scale_units(raw, token.decimals),
                usd_value: 0.0,
                contract_address: Some(token.contract.to_string()),
                decimals: token.decimals,
            });
        }

        let transaction_count = self.transaction_count(&wallet.address).await.ok();

        Ok(WalletSnapshot {
            address: wallet.address.clone(),
            network: self.network,
            balances,
            total_usd_value: 0.0,
            transaction_count,
        })
    }

    async fn fetch_recent_transactions(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>> {
        match &self.explorer {
            Some(explorer) => self.explorer_history(explorer, wallet, limit).await,
            None if self.rpc_url.is_empty() => Err(AdapterError::MissingApiKey(self.key_var())),
            None => {
                self.warn_native_gap_once();
                self.log_history(wallet, limit).await
            }
        }
    }

    async fn fetch_transaction_by_hash(
        &self,
        hash: &str,
        query: &TransferQuery,
    ) -> AdapterResult<Option<ChainTransaction>> {
        let hash = hash.trim();
        let token = if query.is_native(self.network) {
            None
        } else {
            Some(
                policy::token_by_symbol(self.network, &query.currency)
                    .ok_or_else(|| unsupported(self.network, &query.currency))?,
            )
        };

        let Some(tx) = self.transaction(hash).await? else {
            return Ok(None);
        };
        let block = tx
            .block_number
            .as_deref()
            .map(parse_hex_quantity)
            .transpose()?
            .and_then(|n| u64::try_from(n).ok());

        let (receipt, latest, timestamp) = match block {
            Some(number) => {
                let receipt = self.receipt(hash).await?;
                let latest = self.block_number().await?;
                let timestamp = unix_time(self.block_timestamp(number).await?);
                (receipt, latest, timestamp)
            }
            None => (None, 0, Utc::now()),
        };
        let status = match (&receipt, block) {
            (_, None) | (None, _) => TxStatus::Pending,
            (Some(r), Some(_)) if r.status.as_deref() == Some("0x0") => TxStatus::Failed,
            (Some(_), Some(_)) => TxStatus::Success,
        };

        let (from_address, to_address, value) = match token {
            None => (
                tx.from.to_ascii_lowercase(),
                tx.to.clone().unwrap_or_default().to_ascii_lowercase(),
                scale_units(parse_hex_quantity(&tx.value)?, self.network.native_decimals()),
            ),
            Some(token) => {
                let logged = receipt.as_ref().and_then(|r| {
                    r.logs
                        .iter()
                        .filter(|log| token.contract.eq_ignore_ascii_case(&log.address))
                        .filter_map(|log| {
                            abi::decode_transfer_log(&log.address, &log.topics, &log.data).ok()
                        })
                        .find(|decoded| {
                            query
                                .recipient
                                .as_deref()
                                .map_or(true, |r| self.network.addresses_match(r, &decoded.to))
                        })
                        .map(|decoded| (decoded.from, decoded.to, decoded.raw_amount))
                });
                // Reverted and pending transactions carry no logs; fall back to calldata.
                let decoded = logged.or_else(|| {
                    let called = tx.to.as_deref()?;
                    if !token.contract.eq_ignore_ascii_case(called) {
                        return None;
                    }
                    abi::decode_transfer_call(&tx.input)
                        .map(|(to, amount)| (tx.from.to_ascii_lowercase(), to, amount))
                });
                let Some((from, to, raw)) = decoded else {
                    return Err(AdapterError::not_decoded(hash, &query.currency));
                };
                (from, to, scale_units(raw, token.decimals))
            }
        };

        Ok(Some(ChainTransaction {
            network: self.network,
            hash: tx.hash,
            from_address,
            to_address,
            value,
            token_symbol: token.map(|t| t.symbol.to_string()),
            block_height: block.unwrap_or_default(),
            confirmations: confirmations(latest, block),
            timestamp,
            status,
            destination_tag: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use std::time::Duration;

    const WALLET: &str = "0x5aeda56215b167893e80b4fe645ba6d5bab767de";
    const DONOR: &str = "0xa1b2c3d4e5f60718293a4b5c6d7e8f9012345678";
    const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

    fn http() -> Arc<HttpClient> {
        Arc::new(HttpClient::new(Duration::from_secs(5)).unwrap())
    }

    async fn rpc(server: &mut ServerGuard, method: &str, result: Value) {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": method })))
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .create_async()
            .await;
    }

    fn usdt_log(raw: u128) -> Value {
        json!({
            "address": "0xdAC17F958D2ee523a2206206994597C13D831ec7",
            "topics": [
                TRANSFER_EVENT_TOPIC.as_str(),
                abi::address_to_word(DONOR),
                abi::address_to_word(WALLET),
            ],
            "data": format!("0x{raw:064x}"),
            "blockNumber": "0x64",
            "transactionHash": "0xfeed",
        })
    }

    async fn token_transfer_server(raw: u128) -> ServerGuard {
        let mut server = Server::new_async().await;
        rpc(
            &mut server,
            "eth_getTransactionByHash",
            json!({
                "hash": "0xfeed",
                "from": DONOR,
                "to": USDT,
                "value": "0x0",
                "input": "0x",
                "blockNumber": "0x64",
            }),
        )
        .await;
        rpc(
            &mut server,
            "eth_getTransactionReceipt",
            json!({ "status": "0x1", "logs": [usdt_log(raw)] }),
        )
        .await;
        rpc(&mut server, "eth_blockNumber", json!("0x6f")).await;
        rpc(
            &mut server,
            "eth_getBlockByNumber",
            json!({ "number": "0x64", "timestamp": "0x6553f100" }),
        )
        .await;
        server
    }

    #[tokio::test]
    async fn decodes_token_transfer_from_receipt() {
        let server = token_transfer_server(100_020_000).await;
        let adapter = EvmAdapter::new(Network::Ethereum, http(), &server.url(), None);
        let query = TransferQuery::new("USDT").with_recipient(WALLET);

        let tx = adapter
            .fetch_transaction_by_hash("0xfeed", &query)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.token_symbol.as_deref(), Some("USDT"));
        assert_eq!(tx.to_address, WALLET);
        assert_eq!(tx.from_address, DONOR);
        assert!((tx.value - 100.02).abs() < 1e-9);
        assert_eq!(tx.confirmations, 12);
        assert_eq!(tx.block_height, 100);
        assert_eq!(tx.status, TxStatus::Success);
        assert_eq!(tx.timestamp.timestamp(), 0x6553f100);
    }

    #[tokio::test]
    async fn native_transfer_reads_value_field() {
        let mut server = Server::new_async().await;
        rpc(
            &mut server,
            "eth_getTransactionByHash",
            json!({
                "hash": "0xbeef",
                "from": DONOR,
                "to": "0x5AEDA56215b167893e80B4fE645BA6d5Bab767DE",
                "value": "0x1bc16d674ec80000",
                "input": "0x",
                "blockNumber": "0x64",
            }),
        )
        .await;
        rpc(
            &mut server,
            "eth_getTransactionReceipt",
            json!({ "status": "0x0", "logs": [] }),
        )
        .await;
        rpc(&mut server, "eth_blockNumber", json!("0x64")).await;
        rpc(
            &mut server,
            "eth_getBlockByNumber",
            json!({ "timestamp": "0x6553f100" }),
        )
        .await;

        let adapter = EvmAdapter::new(Network::Ethereum, http(), &server.url(), None);
        let tx = adapter
            .fetch_transaction_by_hash("0xbeef", &TransferQuery::native(Network::Ethereum))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.value, 2.0);
        assert_eq!(tx.to_address, WALLET);
        assert_eq!(tx.confirmations, 1);
        assert_eq!(tx.status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn token_lookup_without_transfer_is_not_decoded() {
        let mut server = Server::new_async().await;
        rpc(
            &mut server,
            "eth_getTransactionByHash",
            json!({
                "hash": "0xfeed",
                "from": DONOR,
                "to": "0x0000000000000000000000000000000000000001",
                "value": "0x0",
                "input": "0x",
                "blockNumber": "0x64",
            }),
        )
        .await;
        rpc(
            &mut server,
            "eth_getTransactionReceipt",
            json!({ "status": "0x1", "logs": [] }),
        )
        .await;
        rpc(&mut server, "eth_blockNumber", json!("0x64")).await;
        rpc(&mut server, "eth_getBlockByNumber", json!({ "timestamp": "0x1" })).await;

        let adapter = EvmAdapter::new(Network::Ethereum, http(), &server.url(), None);
        let err = adapter
            .fetch_transaction_by_hash("0xfeed", &TransferQuery::new("USDC"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::TransferNotDecoded { .. }));
        assert!(!err.is_provider_failure());
    }

    #[tokio::test]
    async fn unknown_hash_is_not_found() {
        let mut server = Server::new_async().await;
        rpc(&mut server, "eth_getTransactionByHash", Value::Null).await;

        let adapter = EvmAdapter::new(Network::Bsc, http(), &server.url(), None);
        let result = adapter
            .fetch_transaction_by_hash("0xdead", &TransferQuery::native(Network::Bsc))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_key_and_rpc_is_provider_failure() {
        let adapter = EvmAdapter::new(Network::Ethereum, http(), "", None);
        let err = adapter
            .fetch_transaction_by_hash("0xfeed", &TransferQuery::native(Network::Ethereum))
            .await
            .unwrap_err();
        assert_eq!(err, AdapterError::MissingApiKey("ETHERSCAN_API_KEY"));
        assert!(err.is_provider_failure());
    }

    #[tokio::test]
    async fn keyless_history_scans_transfer_logs() {
        let mut server = Server::new_async().await;
        rpc(&mut server, "eth_blockNumber", json!("0x6f")).await;
        rpc(&mut server, "eth_getLogs", json!([usdt_log(25_000_000)])).await;
        rpc(
            &mut server,
            "eth_getBlockByNumber",
            json!({ "timestamp": "0x6553f100" }),
        )
        .await;

        let adapter = EvmAdapter::new(Network::Ethereum, http(), &server.url(), None);
        let wallet = WalletAddress::new(Network::Ethereum, WALLET);
        let txs = adapter.fetch_recent_transactions(&wallet, 10).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].hash, "0xfeed");
        assert_eq!(txs[0].value, 25.0);
        assert_eq!(txs[0].to_address, WALLET);
        assert_eq!(txs[0].confirmations, 12);

        assert!(adapter.native_gap_warned.load(Ordering::Relaxed));
        assert!(!adapter.warn_native_gap_once());
    }

    #[tokio::test]
    async fn explorer_history_merges_native_and_token_rows() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api")
            .match_query(Matcher::UrlEncoded("action".into(), "txlist".into()))
            .with_body(
                json!({
                    "status": "1",
                    "message": "OK",
                    "result": [{
                        "hash": "0xnative", "from": DONOR, "to": WALLET,
                        "value": "500000000000000000", "blockNumber": "100",
                        "timeStamp": "1700000000", "confirmations": "20", "isError": "0"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api")
            .match_query(Matcher::UrlEncoded("action".into(), "tokentx".into()))
            .with_body(
                json!({
                    "status": "1",
                    "message": "OK",
                    "result": [
                        {
                            "hash": "0xtoken", "from": DONOR, "to": WALLET,
                            "value": "5000000", "blockNumber": "101",
                            "timeStamp": "1700000100", "confirmations": "19",
                            "contractAddress": USDT, "tokenDecimal": "6"
                        },
                        {
                            "hash": "0xspam", "from": DONOR, "to": WALLET,
                            "value": "1", "blockNumber": "102",
                            "timeStamp": "1700000200", "confirmations": "18",
                            "contractAddress": "0x0000000000000000000000000000000000000bad",
                            "tokenDecimal": "18"
                        }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let explorer = ExplorerApi::new(&format!("{}/api", server.url()), "key");
        let adapter = EvmAdapter::new(Network::Ethereum, http(), "", Some(explorer));
        let wallet = WalletAddress::new(Network::Ethereum, WALLET);
        let txs = adapter.fetch_recent_transactions(&wallet, 10).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].hash, "0xtoken");
        assert_eq!(txs[0].value, 5.0);
        assert_eq!(txs[1].value, 0.5);
        assert_eq!(txs[1].token_symbol, None);
    }

    #[tokio::test]
    async fn explorer_rate_limit_is_reported() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api")
            .match_query(Matcher::Any)
            .with_body(r#"{"status":"0","message":"NOTOK","result":"Max rate limit reached"}"#)
            .create_async()
            .await;

        let explorer = ExplorerApi::new(&format!("{}/api", server.url()), "key");
        let adapter = EvmAdapter::new(Network::Ethereum, http(), "", Some(explorer));
        let err = adapter
            .fetch_transaction_by_hash("0xfeed", &TransferQuery::native(Network::Ethereum))
            .await
            .unwrap_err();
        assert_eq!(err, AdapterError::RateLimited);
    }

    #[tokio::test]
    async fn snapshot_includes_nonzero_tokens() {
        let mut server = Server::new_async().await;
        rpc(&mut server, "eth_getBalance", json!("0xde0b6b3a7640000")).await;
        server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({ "method": "eth_call" })),
                Matcher::Regex(USDT.to_string()),
            ]))
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": "0x3b9aca00"}).to_string())
            .create_async()
            .await;
        rpc(&mut server, "eth_call", json!("0x0")).await;
        rpc(&mut server, "eth_getTransactionCount", json!("0x7")).await;

        let adapter = EvmAdapter::new(Network::Ethereum, http(), &server.url(), None);
        let wallet = WalletAddress::new(Network::Ethereum, WALLET);
        let snapshot = adapter.fetch_wallet_snapshot(&wallet).await.unwrap();
        assert_eq!(snapshot.balances.len(), 2);
        assert_eq!(snapshot.balances[0].balance, 1.0);
        assert_eq!(snapshot.balances[1].symbol, "USDT");
        assert_eq!(snapshot.balances[1].balance, 1000.0);
        assert_eq!(snapshot.transaction_count, Some(7));
    }
}
