//! Data structures shared by the chain adapters, the verifier, the monitor and
//! the HTTP surface.

mod units;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

pub use units::*;

/// Blockchain networks a donation can arrive on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Network {
    #[strum(to_string = "bitcoin", serialize = "btc")]
    Bitcoin,
    #[strum(to_string = "ethereum", serialize = "eth")]
    Ethereum,
    #[strum(to_string = "bsc", serialize = "bnb", serialize = "binance")]
    Bsc,
    #[strum(to_string = "xrp", serialize = "ripple")]
    Xrp,
    #[strum(to_string = "solana", serialize = "sol")]
    Solana,
    #[strum(to_string = "tron", serialize = "trx")]
    Tron,
}

impl Network {
    /// Symbol of the chain's native coin.
    pub fn native_symbol(self) -> &'static str {
        match self {
            Network::Bitcoin => "BTC",
            Network::Ethereum => "ETH",
            Network::Bsc => "BNB",
            Network::Xrp => "XRP",
            Network::Solana => "SOL",
            Network::Tron => "TRX",
        }
    }

    /// Decimal places between the chain's smallest unit and one whole coin
    /// (satoshi, wei, drop, lamport, sun).
    pub fn native_decimals(self) -> u32 {
        match self {
            Network::Bitcoin => 8,
            Network::Ethereum | Network::Bsc => 18,
            Network::Xrp | Network::Tron => 6,
            Network::Solana => 9,
        }
    }

    pub fn is_evm(self) -> bool {
        matches!(self, Network::Ethereum | Network::Bsc)
    }

    /// Whether `symbol` names this chain's native coin.
    pub fn is_native(self, symbol: &str) -> bool {
        symbol.eq_ignore_ascii_case(self.native_symbol())
    }

    /// Compares two addresses the way the chain defines equality: EVM hex
    /// addresses case-insensitively, everything else byte for byte.
    pub fn addresses_match(self, left: &str, right: &str) -> bool {
        let (left, right) = (left.trim(), right.trim());
        if self.is_evm() {
            left.eq_ignore_ascii_case(right)
        } else {
            left == right
        }
    }

    /// The one spelling of a transaction hash used for dedup and storage.
    /// Hex hashes are lowercased and Tron ids lose any `0x` prefix; base58
    /// (Solana) and XRP hashes are only trimmed.
    pub fn canonical_hash(self, hash: &str) -> String {
        let hash = hash.trim();
        match self {
            Network::Bitcoin | Network::Ethereum | Network::Bsc => hash.to_ascii_lowercase(),
            Network::Tron => {
                let lower = hash.to_ascii_lowercase();
                match lower.strip_prefix("0x") {
                    Some(stripped) => stripped.to_string(),
                    None => lower,
                }
            }
            Network::Xrp | Network::Solana => hash.to_string(),
        }
    }
}

/// A donation-receiving address on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    pub network: Network,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<u32>,
}

impl WalletAddress {
    pub fn new(network: Network, address: impl Into<String>) -> Self {
        Self {
            network,
            address: address.into().trim().to_string(),
            destination_tag: None,
        }
    }

    pub fn with_destination_tag(mut self, tag: Option<u32>) -> Self {
        self.destination_tag = tag;
        self
    }

    /// Empty addresses are placeholders for networks the operator did not
    /// configure.
    pub fn is_configured(&self) -> bool {
        !self.address.is_empty()
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.is_configured() && self.network.addresses_match(&self.address, candidate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

/// Normalized view of a single on-chain transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub network: Network,
    pub hash: String,
    pub from_address: String,
    pub to_address: String,
    /// Amount in whole units of `symbol()` (already scaled by decimals).
    pub value: f64,
    /// `None` for the chain's native coin.
    pub token_symbol: Option<String>,
    pub block_height: u64,
    pub confirmations: u32,
    pub timestamp: DateTime<Utc>,
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<u32>,
}

impl ChainTransaction {
    /// Symbol of the asset this transaction moved.
    pub fn symbol(&self) -> &str {
        self.token_symbol
            .as_deref()
            .unwrap_or_else(|| self.network.native_symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub symbol: String,
    pub name: String,
    pub balance: f64,
    pub usd_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub address: String,
    pub network: Network,
    pub balances: Vec<TokenBalance>,
    pub total_usd_value: f64,
    /// Not every explorer reports a transaction count.
    pub transaction_count: Option<u64>,
}

impl WalletSnapshot {
    /// Fills `usd_value` of every balance from `prices` and recomputes the
    /// total. Unknown symbols are valued at zero.
    pub fn apply_prices(&mut self, prices: &PriceTable) {
        let mut total = 0.0;
        for balance in &mut self.balances {
            balance.usd_value = prices.to_usd(&balance.symbol, balance.balance).unwrap_or(0.0);
            total += balance.usd_value;
        }
        self.total_usd_value = total;
    }
}

/// Individual checks that make up a verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub address_matches: bool,
    pub amount_matches: bool,
    pub confirmations_met: bool,
}

impl VerificationChecks {
    pub fn all(&self) -> bool {
        self.address_matches && self.amount_matches && self.confirmations_met
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_valid: bool,
    /// Set when the provider could not be reached and the result echoes the
    /// expected values instead of chain data.
    pub manual_review_required: bool,
    pub network: Network,
    pub currency: String,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub amount: f64,
    pub to_address: String,
    pub from_address: String,
    pub block_height: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub checks: VerificationChecks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    /// Valid on chain data alone, without the manual-review escape hatch.
    pub fn is_verified(&self) -> bool {
        self.is_valid && !self.manual_review_required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DonationId(pub i64);

impl std::fmt::Display for DonationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Payment-method specific details stored alongside a donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DonationMetadata {
    Crypto {
        network: Network,
        wallet_address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_address: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination_tag: Option<u32>,
    },
    Card {
        processor: String,
        reference: String,
    },
    Bank {
        reference: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDonation {
    pub amount: f64,
    pub amount_usd: f64,
    pub currency: String,
    pub network: Option<Network>,
    pub status: DonationStatus,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
    pub metadata: Option<DonationMetadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: DonationId,
    pub amount: f64,
    pub amount_usd: f64,
    pub currency: String,
    pub network: Option<Network>,
    pub status: DonationStatus,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
    pub metadata: Option<DonationMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub id: DonationId,
    pub status: DonationStatus,
    pub tx_hash: Option<String>,
    pub confirmations: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Live,
    Fallback,
}

/// Spot USD prices keyed by upper-case asset symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    prices: BTreeMap<String, f64>,
    pub source: PriceSource,
    pub fetched_at: DateTime<Utc>,
}

impl PriceTable {
    pub fn new(source: PriceSource) -> Self {
        Self {
            prices: BTreeMap::new(),
            source,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_price(mut self, symbol: &str, usd: f64) -> Self {
        self.insert(symbol, usd);
        self
    }

    pub fn insert(&mut self, symbol: &str, usd: f64) {
        self.prices.insert(symbol.to_ascii_uppercase(), usd);
    }

    pub fn usd_price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(&symbol.to_ascii_uppercase()).copied()
    }

    pub fn to_usd(&self, symbol: &str, amount: f64) -> Option<f64> {
        self.usd_price(symbol).map(|price| price * amount)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.prices.contains_key(&symbol.to_ascii_uppercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(symbol, price)| (symbol.as_str(), *price))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
