//! Tron adapter over the TronGrid REST API.
//!
//! Account history comes from the `/v1` indexer, individual lookups from the
//! full-node `/wallet` endpoints. The node speaks hex addresses (`41` + 20
//! bytes) while the indexer and users speak base58check; everything leaving
//! this module is base58check.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::RequestBuilder;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use donation_watch_domain::{
    parse_decimal_units,
    policy::{self, TokenContract},
    scale_units, ChainTransaction, Network, TokenBalance, TxStatus, WalletAddress, WalletSnapshot,
};

use crate::{
    abi,
    adapter::{unix_time, unsupported, NetworkAdapter, TransferQuery},
    error::{AdapterError, AdapterResult},
    http::HttpClient,
};

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
const ADDRESS_PREFIX: u8 = 0x41;

/// `41`-prefixed (or bare 20-byte) hex address to base58check.
pub fn hex_to_base58(hex_address: &str) -> Option<String> {
    let digits = hex_address.trim().trim_start_matches("0x");
    let mut bytes = hex::decode(digits).ok()?;
    if bytes.len() == 20 {
        bytes.insert(0, ADDRESS_PREFIX);
    }
    if bytes.len() != 21 || bytes[0] != ADDRESS_PREFIX {
        return None;
    }
    Some(bs58::encode(bytes).with_check().into_string())
}

/// Base58check address to lowercase `41`-prefixed hex.
pub fn base58_to_hex(address: &str) -> Option<String> {
    let bytes = bs58::decode(address.trim())
        .with_check(None)
        .into_vec()
        .ok()?;
    (bytes.len() == 21 && bytes[0] == ADDRESS_PREFIX).then(|| hex::encode(bytes))
}

/// Converts the `0x` + 40 hex form produced by the ABI codec.
fn evm_to_base58(address: &str) -> String {
    hex_to_base58(address).unwrap_or_else(|| address.to_string())
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(default)]
    balance: u64,
    #[serde(default)]
    trc20: Vec<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct NodeTx {
    #[serde(default, rename = "txID")]
    tx_id: Option<String>,
    #[serde(default, rename = "blockNumber")]
    block_number: Option<u64>,
    #[serde(default)]
    block_timestamp: Option<i64>,
    #[serde(default)]
    ret: Vec<ContractResult>,
    #[serde(default)]
    raw_data: Option<RawData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractResult {
    #[serde(default)]
    contract_ret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(default)]
    contract: Vec<Contract>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Contract {
    #[serde(rename = "type")]
    kind: String,
    parameter: ContractParameter,
}

#[derive(Debug, Deserialize)]
struct ContractParameter {
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TxInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "blockNumber")]
    block_number: Option<u64>,
    #[serde(default, rename = "blockTimeStamp")]
    block_timestamp: Option<i64>,
    #[serde(default)]
    receipt: Option<Receipt>,
    #[serde(default)]
    log: Vec<NodeLog>,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodeLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct Trc20Transfer {
    transaction_id: String,
    token_info: TokenInfo,
    block_timestamp: i64,
    from: String,
    to: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    address: String,
}

#[derive(Debug, Deserialize)]
struct NowBlock {
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: BlockRaw,
}

#[derive(Debug, Deserialize)]
struct BlockRaw {
    number: u64,
}

/// A TRX `TransferContract` payload.
struct NativeTransfer {
    from: String,
    to: String,
    sun: u64,
}

fn native_transfer(contract: &Contract) -> Option<NativeTransfer> {
    if contract.kind != "TransferContract" {
        return None;
    }
    let value = &contract.parameter.value;
    Some(NativeTransfer {
        from: hex_to_base58(value.get("owner_address")?.as_str()?)?,
        to: hex_to_base58(value.get("to_address")?.as_str()?)?,
        sun: value.get("amount")?.as_u64()?,
    })
}

fn confirmations(head: u64, block: Option<u64>) -> u32 {
    block
        .map(|b| u32::try_from(head.saturating_sub(b) + 1).unwrap_or(u32::MAX))
        .unwrap_or_default()
}

fn millis(ms: Option<i64>) -> chrono::DateTime<Utc> {
    ms.map(|ms| unix_time(ms / 1000)).unwrap_or_else(Utc::now)
}

pub struct TronAdapter {
    http: Arc<HttpClient>,
    base_url: String,
    api_key: Option<String>,
}

impl TronAdapter {
    pub fn new(http: Arc<HttpClient>, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn node_call<T: DeserializeOwned>(&self, path: &str, body: Value) -> AdapterResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.authorize(self.http.post(&url).json(&body));
        self.http.send_json(request).await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, limit: usize) -> AdapterResult<Vec<T>> {
        let request = self
            .authorize(self.http.get(&format!("{}{}", self.base_url, path)))
            .query(&[("limit", limit.to_string()), ("only_confirmed", "true".to_string())]);
        let page: Page<T> = self.http.send_json(request).await?;
        Ok(page.data)
    }

    async fn head_block(&self) -> AdapterResult<u64> {
        let block: NowBlock = self.node_call("/wallet/getnowblock", json!({})).await?;
        Ok(block.block_header.raw_data.number)
    }

    async fn transaction_info(&self, hash: &str) -> AdapterResult<TxInfo> {
        self.node_call("/wallet/gettransactioninfobyid", json!({ "value": hash }))
            .await
    }

    /// The TRC-20 transfer of `token` inside a transaction, from its event
    /// logs or, for transactions without logs, from the call data.
    fn token_transfer(
        &self,
        tx: &NodeTx,
        info: &TxInfo,
        token: &TokenContract,
        recipient: Option<&str>,
    ) -> Option<(String, String, u128)> {
        let token_hex = base58_to_hex(token.contract)?;
        let from_logs = info
            .log
            .iter()
            .filter(|log| {
                token_hex[2..].eq_ignore_ascii_case(log.address.trim_start_matches("0x"))
            })
            .filter_map(|log| abi::decode_transfer_log(&log.address, &log.topics, &log.data).ok())
            .map(|t| (evm_to_base58(&t.from), evm_to_base58(&t.to), t.raw_amount))
            .find(|(_, to, _)| recipient.map_or(true, |r| to == r));
        if from_logs.is_some() {
            return from_logs;
        }

        let contract = tx.raw_data.as_ref()?.contract.first()?;
        if contract.kind != "TriggerSmartContract" {
            return None;
        }
        let value = &contract.parameter.value;
        let called = value.get("contract_address")?.as_str()?;
        if !called.eq_ignore_ascii_case(&token_hex) {
            return None;
        }
        let (to, amount) = abi::decode_transfer_call(value.get("data")?.as_str()?)?;
        let to = evm_to_base58(&to);
        if recipient.map_or(false, |r| to != r) {
            return None;
        }
        let from = hex_to_base58(value.get("owner_address")?.as_str()?)?;
        Some((from, to, amount))
    }
}

#[async_trait]
impl NetworkAdapter for TronAdapter {
    fn network(&self) -> Network {
        Network::Tron
    }

    async fn fetch_wallet_snapshot(&self, wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
        let request = self.authorize(
            self.http
                .get(&format!("{}/v1/accounts/{}", self.base_url, wallet.address)),
        );
        let page: Page<Account> = self.http.send_json(request).await?;
        // Accounts that never received anything are not activated.
        let account = page.data.into_iter().next();

        let decimals = Network::Tron.native_decimals();
        let mut balances = vec![TokenBalance {
            symbol: "TRX".into(),
            name: "Tron".into(),
            balance: scale_units(
                u128::from(account.as_ref().map(|a| a.balance).unwrap_or_default()),
                decimals,
            ),
            usd_value: 0.0,
            contract_address: None,
            decimals,
        }];
        for token in policy::tokens_for(Network::Tron) {
            let raw = account
                .iter()
                .flat_map(|a| a.trc20.iter())
                .filter_map(|entry| entry.get(token.contract))
                .map(|amount| parse_decimal_units(amount))
                .sum::<Result<u128, _>>()?;
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

        Ok(WalletSnapshot {
            address: wallet.address.clone(),
            network: Network::Tron,
            balances,
            total_usd_value: 0.0,
            transaction_count: None,
        })
    }

    async fn fetch_recent_transactions(
        &self,
        wallet: &WalletAddress,
        limit: usize,
    ) -> AdapterResult<Vec<ChainTransaction>> {
        let native: Vec<NodeTx> = self
            .list(&format!("/v1/accounts/{}/transactions", wallet.address), limit)
            .await?;
        let tokens: Vec<Trc20Transfer> = self
            .list(&format!("/v1/accounts/{}/transactions/trc20", wallet.address), limit)
            .await?;
        let head = self.head_block().await?;

        let mut transactions = Vec::new();
        for tx in native {
            let Some(raw) = &tx.raw_data else { continue };
            let Some(transfer) = raw.contract.first().and_then(native_transfer) else {
                continue;
            };
            let success = tx
                .ret
                .first()
                .and_then(|r| r.contract_ret.as_deref())
                .map_or(true, |r| r == "SUCCESS");
            transactions.push(ChainTransaction {
                network: Network::Tron,
                hash: tx.tx_id.clone().unwrap_or_default(),
                from_address: transfer.from,
                to_address: transfer.to,
                value: scale_units(u128::from(transfer.sun), Network::Tron.native_decimals()),
                token_symbol: None,
                block_height: tx.block_number.unwrap_or_default(),
                confirmations: confirmations(head, tx.block_number),
                timestamp: millis(tx.block_timestamp.or(raw.timestamp)),
                status: if success { TxStatus::Success } else { TxStatus::Failed },
                destination_tag: None,
            });
        }

        let known: Vec<(Trc20Transfer, &TokenContract)> = tokens
            .into_iter()
            .filter_map(|t| {
                let token = policy::token_by_contract(Network::Tron, &t.token_info.address)?;
                Some((t, token))
            })
            .collect();
        let infos = join_all(
            known
                .iter()
                .map(|(t, _)| self.transaction_info(&t.transaction_id)),
        )
        .await;
        for ((transfer, token), info) in known.into_iter().zip(infos) {
            let info = info?;
            let failed = info
                .receipt
                .as_ref()
                .and_then(|r| r.result.as_deref())
                .map_or(false, |r| r != "SUCCESS");
            transactions.push(ChainTransaction {
                network: Network::Tron,
                hash: transfer.transaction_id,
                from_address: transfer.from,
                to_address: transfer.to,
                value: scale_units(parse_decimal_units(&transfer.value)?, token.decimals),
                token_symbol: Some(token.symbol.to_string()),
                block_height: info.block_number.unwrap_or_default(),
                confirmations: confirmations(head, info.block_number),
                timestamp: millis(Some(transfer.block_timestamp)),
                status: if failed { TxStatus::Failed } else { TxStatus::Success },
                destination_tag: None,
            });
        }

        transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        transactions.truncate(limit);
        Ok(transactions)
    }

    async fn fetch_transaction_by_hash(
        &self,
        hash: &str,
        query: &TransferQuery,
    ) -> AdapterResult<Option<ChainTransaction>> {
        let hash = hash.trim().trim_start_matches("0x");
        let tx: NodeTx = self
            .node_call("/wallet/gettransactionbyid", json!({ "value": hash }))
            .await?;
        if tx.tx_id.is_none() {
            return Ok(None);
        }
        let info = self.transaction_info(hash).await?;
        let head = match info.block_number {
            Some(_) => self.head_block().await?,
            None => 0,
        };

        let contract_ret = tx.ret.first().and_then(|r| r.contract_ret.as_deref());
        let receipt_ret = info.receipt.as_ref().and_then(|r| r.result.as_deref());
        let status = match (info.id.as_ref().and(info.block_number), contract_ret, receipt_ret) {
            (_, Some(ret), _) if ret != "SUCCESS" => TxStatus::Failed,
            (_, _, Some(ret)) if ret != "SUCCESS" => TxStatus::Failed,
            (None, _, _) => TxStatus::Pending,
            (Some(_), _, _) => TxStatus::Success,
        };
        let recipient = query.recipient.as_deref();

        let (from, to, value, token_symbol) = if query.is_native(Network::Tron) {
            let transfer = tx
                .raw_data
                .as_ref()
                .and_then(|raw| raw.contract.first())
                .and_then(native_transfer)
                .ok_or_else(|| AdapterError::not_decoded(hash, &query.currency))?;
            (
                transfer.from,
                transfer.to,
                scale_units(u128::from(transfer.sun), Network::Tron.native_decimals()),
                None,
            )
        } else {
            let token = policy::token_by_symbol(Network::Tron, &query.currency)
                .ok_or_else(|| unsupported(Network::Tron, &query.currency))?;
            let (from, to, raw) = self
                .token_transfer(&tx, &info, token, recipient)
                .ok_or_else(|| AdapterError::not_decoded(hash, &query.currency))?;
            (from, to, scale_units(raw, token.decimals), Some(token.symbol.to_string()))
        };

        Ok(Some(ChainTransaction {
            network: Network::Tron,
            hash: tx.tx_id.unwrap_or_default(),
            from_address: from,
            to_address: to,
            value,
            token_symbol,
            block_height: info.block_number.unwrap_or_default(),
            confirmations: confirmations(head, info.block_number),
            timestamp: millis(
                info.block_timestamp
                    .or_else(|| tx.raw_data.as_ref().and_then(|raw| raw.timestamp)),
            ),
            status,
            destination_tag: None,
        }))
    }
}
