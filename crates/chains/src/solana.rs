//! Solana adapter over the JSON-RPC API using `jsonParsed` encoding.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};

use donation_watch_domain::{
    parse_decimal_units,
    policy::{self, TokenContract},
    scale_units, ChainTransaction, Network, TokenBalance, TxStatus, WalletAddress, WalletSnapshot,
};

use crate::{
    adapter::{unix_time, NetworkAdapter, TransferQuery},
    error::{AdapterError, AdapterResult},
    http::HttpClient,
};

const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Debug, Deserialize)]
struct RpcValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct TokenAccount {
    account: TokenAccountData,
}

#[derive(Debug, Deserialize)]
struct TokenAccountData {
    data: ParsedData,
}

#[derive(Debug, Deserialize)]
struct ParsedData {
    parsed: ParsedTokenAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedTokenAccount {
    info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAccountInfo {
    mint: String,
    token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
struct UiTokenAmount {
    amount: String,
    decimals: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureInfo {
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedTransaction {
    slot: u64,
    #[serde(default)]
    block_time: Option<i64>,
    #[serde(default)]
    meta: Option<TransactionMeta>,
    transaction: TransactionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    pre_token_balances: Vec<TokenBalanceEntry>,
    #[serde(default)]
    post_token_balances: Vec<TokenBalanceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalanceEntry {
    account_index: u32,
    mint: String,
    #[serde(default)]
    owner: Option<String>,
    ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    message: Message,
    #[serde(default)]
    signatures: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    instructions: Vec<Instruction>,
}

#[derive(Debug, Deserialize)]
struct Instruction {
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    parsed: Option<Value>,
}

/// A native `transfer` instruction of the system program.
#[derive(Debug, Clone, PartialEq)]
struct SystemTransfer {
    source: String,
    destination: String,
    lamports: u64,
}

impl ParsedTransaction {
    fn system_transfers(&self) -> Vec<SystemTransfer> {
        self.transaction
            .message
            .instructions
            .iter()
            .filter(|ix| ix.program.as_deref() == Some("system"))
            .filter_map(|ix| ix.parsed.as_ref())
            .filter(|parsed| {
                matches!(
                    parsed.get("type").and_then(Value::as_str),
                    Some("transfer") | Some("transferWithSeed")
                )
            })
            .filter_map(|parsed| {
                let info = parsed.get("info")?;
                Some(SystemTransfer {
                    source: info.get("source")?.as_str()?.to_string(),
                    destination: info.get("destination")?.as_str()?.to_string(),
                    lamports: info.get("lamports")?.as_u64()?,
                })
            })
            .collect()
    }

    /// Per-owner change of `mint` balances across the transaction, in raw
    /// units. Owners missing from the pre-balances started at zero.
    fn token_deltas(&self, mint: &str) -> Vec<(String, i128)> {
        let Some(meta) = &self.meta else {
            return Vec::new();
        };
        let raw = |entry: &TokenBalanceEntry| -> i128 {
            parse_decimal_units(&entry.ui_token_amount.amount)
                .ok()
                .and_then(|v| i128::try_from(v).ok())
                .unwrap_or_default()
        };
        let mut deltas: Vec<(String, i128)> = Vec::new();
        for post in meta.post_token_balances.iter().filter(|b| b.mint == mint) {
            let before = meta
                .pre_token_balances
                .iter()
                .find(|pre| pre.mint == mint && pre.account_index == post.account_index)
                .map(raw)
                .unwrap_or_default();
            let owner = post.owner.clone().unwrap_or_default();
            deltas.push((owner, raw(post) - before));
        }
        for pre in meta.pre_token_balances.iter().filter(|b| b.mint == mint) {
            let closed = !meta
                .post_token_balances
                .iter()
                .any(|post| post.mint == mint && post.account_index == pre.account_index);
            if closed {
                deltas.push((pre.owner.clone().unwrap_or_default(), -raw(pre)));
            }
        }
        deltas
    }

    fn status(&self) -> TxStatus {
        match self.meta.as_ref().and_then(|m| m.err.as_ref()) {
            Some(err) if !err.is_null() => TxStatus::Failed,
            _ => TxStatus::Success,
        }
    }

    fn hash(&self) -> String {
        self.transaction.signatures.first().cloned().unwrap_or_default()
    }
}

pub struct SolanaAdapter {
    http: Arc<HttpClient>,
    rpc_url: String,
}

impl SolanaAdapter {
    pub fn new(http: Arc<HttpClient>, rpc_url: &str) -> Self {
        Self {
            http,
            rpc_url: rpc_url.trim().to_string(),
        }
    }

    async fn current_slot(&self) -> AdapterResult<u64> {
        self.http
            .json_rpc(&self.rpc_url, "getSlot", json!([{ "commitment": "confirmed" }]))
            .await
    }

    async fn transaction(&self, signature: &str) -> AdapterResult<Option<ParsedTransaction>> {
        self.http
            .json_rpc(
                &self.rpc_url,
                "getTransaction",
                json!([
                    signature,
                    { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0, "commitment": "confirmed" }
                ]),
            )
            .await
    }

    fn build(
        &self,
        tx: &ParsedTransaction,
        from: String,
        to: String,
        value: f64,
        token: Option<&TokenContract>,
        slot: u64,
    ) -> ChainTransaction {
        ChainTransaction {
            network: Network::Solana,
            hash: tx.hash(),
            from_address: from,
            to_address: to,
            value,
            token_symbol: token.map(|t| t.symbol.to_string()),
            block_height: tx.slot,
            confirmations: u32::try_from(slot.saturating_sub(tx.slot)).unwrap_or(u32::MAX),
            timestamp: tx.block_time.map(unix_time).unwrap_or_else(Utc::now),
            status: tx.status(),
            destination_tag: None,
        }
    }

    /// Extracts the transfer selected by `query`.
    fn decode(
        &self,
        tx: &ParsedTransaction,
        query: &TransferQuery,
        slot: u64,
    ) -> AdapterResult<ChainTransaction> {
        // A transfer to the requested recipient wins; otherwise the first
        // one is returned so the caller sees who was actually paid.
        let recipient = query.recipient.as_deref();
        if query.is_native(Network::Solana) {
            let transfers = tx.system_transfers();
            let transfer = recipient
                .and_then(|r| transfers.iter().find(|t| t.destination == r))
                .or_else(|| transfers.first())
                .cloned()
                .ok_or_else(|| AdapterError::not_decoded(&tx.hash(), &query.currency))?;
            return Ok(self.build(
                tx,
                transfer.source,
                transfer.destination,
                scale_units(u128::from(transfer.lamports), Network::Solana.native_decimals()),
                None,
                slot,
            ));
        }

        let token = policy::token_by_symbol(Network::Solana, &query.currency).ok_or_else(|| {
            AdapterError::UnsupportedAsset {
                network: Network::Solana,
                currency: query.currency.clone(),
            }
        })?;
        let deltas = tx.token_deltas(token.contract);
        let largest_credit = |to_recipient: bool| {
            deltas
                .iter()
                .filter(|(owner, delta)| {
                    *delta > 0 && (!to_recipient || recipient.map_or(true, |r| owner == r))
                })
                .max_by_key(|(_, delta)| *delta)
                .cloned()
        };
        let received = largest_credit(true)
            .or_else(|| largest_credit(false))
            .ok_or_else(|| AdapterError::not_decoded(&tx.hash(), &query.currency))?;
        let sender = deltas
            .iter()
            .filter(|(_, delta)| *delta < 0)
            .min_by_key(|(_, delta)| *delta)
            .map(|(owner, _)| owner.clone())
            .unwrap_or_default();
        let (owner, raw) = received;
        Ok(self.build(
            tx,
            sender,
            owner,
            scale_units(raw.unsigned_abs(), token.decimals),
            Some(token),
            slot,
        ))
    }

    /// The wallet-relevant view of a transaction: an incoming transfer if one
    /// exists, otherwise an outgoing one so the caller can classify it.
    fn for_wallet(&self, tx: &ParsedTransaction, wallet: &str, slot: u64) -> Option<ChainTransaction> {
        let incoming = std::iter::once(TransferQuery::native(Network::Solana))
            .chain(policy::tokens_for(Network::Solana).map(|t| TransferQuery::new(t.symbol)))
            .find_map(|query| {
                self.decode(tx, &query.with_recipient(wallet), slot)
                    .ok()
                    .filter(|found| found.to_address == wallet)
            });
        if incoming.is_some() {
            return incoming;
        }
        tx.system_transfers()
            .into_iter()
            .find(|t| t.source == wallet)
            .map(|t| {
                self.build(
                    tx,
                    t.source,
                    t.destination,
                    scale_units(u128::from(t.lamports), Network::Solana.native_decimals()),
                    None,
                    slot,
                )
            })
    }
}

#[async_trait]
impl NetworkAdapter for SolanaAdapter {
    fn network(&self) -> Network {
        Network::Solana
    }

    async fn fetch_wallet_snapshot(&self, wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
        let lamports: RpcValue<u64> = self
            .http
            .json_rpc(&self.rpc_url, "getBalance", json!([wallet.address]))
            .await?;
        let accounts: RpcValue<Vec<TokenAccount>> = self
            .http
            .json_rpc(
                &self.rpc_url,
                "getTokenAccountsByOwner",
                json!([
                    wallet.address,
                    { "programId": TOKEN_PROGRAM_ID },
                    { "encoding": "jsonParsed" }
                ]),
            )
            .await?;

        let decimals = Network::Solana.native_decimals();
        let mut balances = vec![TokenBalance {
            symbol: "SOL".into(),
            name: "Solana".into(),
            balance: scale_units(u128::from(lamports.value), decimals),
            usd_value: 0.0,
            contract_address: None,
            decimals,
        }];
        for token in policy::tokens_for(Network::Solana) {
            let mut raw: u128 = 0;
            let mut token_decimals = token.decimals;
            for account in accounts
                .value
                .iter()
                .filter(|a| a.account.data.parsed.info.mint == token.contract)
            {
                let amount = &account.account.data.parsed.info.token_amount;
                raw += parse_decimal_units(&amount.amount)?;
                token_decimals = amount.decimals;
            }
            if raw == 0 {
                continue;
            }
            balances.push(TokenBalance {
                symbol: token.symbol.to_string(),
                name: token.name.to_string(),
                balance: scale_units(raw, token_decimals),
                usd_value: 0.0,
                contract_address: Some(token.contract.to_string()),
                decimals: token_decimals,
            });
        }

        Ok(WalletSnapshot {
            address: wallet.address.clone(),
            network: Network::Solana,
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
        let signatures: Vec<SignatureInfo> = self
            .http
            .json_rpc(
                &self.rpc_url,
                "getSignaturesForAddress",
                json!([wallet.address, { "limit": limit }]),
            )
            .await?;
        let slot = self.current_slot().await?;
        let fetched = join_all(signatures.iter().map(|s| self.transaction(&s.signature))).await;

        let mut transactions = Vec::with_capacity(fetched.len());
        for tx in fetched {
            if let Some(tx) = tx? {
                if let Some(normalized) = self.for_wallet(&tx, &wallet.address, slot) {
                    transactions.push(normalized);
                }
            }
        }
        Ok(transactions)
    }

    async fn fetch_transaction_by_hash(
        &self,
        hash: &str,
        query: &TransferQuery,
    ) -> AdapterResult<Option<ChainTransaction>> {
        let Some(tx) = self.transaction(hash.trim()).await? else {
            return Ok(None);
        };
        let slot = self.current_slot().await?;
        self.decode(&tx, query, slot).map(Some)
    }
}
