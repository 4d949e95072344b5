//! Policy constants consulted by the verifier, the monitor and the adapters.
//! Thresholds, tolerances and fallback values are defined here once.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::Network;

/// Confirmations required before a transfer counts as final.
pub const fn required_confirmations(network: Network) -> u32 {
    match network {
        Network::Bitcoin => 1,
        Network::Ethereum | Network::Bsc => 12,
        Network::Solana => 32,
        Network::Tron => 19,
        Network::Xrp => 1,
    }
}

/// Absolute tolerance for stablecoin amounts.
pub const STABLECOIN_TOLERANCE: f64 = 0.01;
/// Absolute tolerance for every other asset; covers float rounding only.
pub const DEFAULT_TOLERANCE: f64 = 0.000_001;
/// Slack added on top of a tolerance so an exact boundary difference survives
/// float subtraction.
const TOLERANCE_EPSILON: f64 = 1e-9;

pub const STABLECOINS: [&str; 2] = ["USDT", "USDC"];

pub fn is_stablecoin(symbol: &str) -> bool {
    STABLECOINS.iter().any(|s| s.eq_ignore_ascii_case(symbol))
}

pub fn amount_tolerance(symbol: &str) -> f64 {
    if is_stablecoin(symbol) {
        STABLECOIN_TOLERANCE
    } else {
        DEFAULT_TOLERANCE
    }
}

pub fn amounts_match(symbol: &str, expected: f64, actual: f64) -> bool {
    (actual - expected).abs() <= amount_tolerance(symbol) + TOLERANCE_EPSILON
}

/// Price table TTL.
pub const PRICE_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL_MINUTES: u64 = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_PENDING_FAILURE_CUTOFF_HOURS: i64 = 24;
/// Transactions fetched per wallet per monitor cycle.
pub const RECENT_TRANSACTION_LIMIT: usize = 10;
/// Blocks scanned for Transfer logs when no explorer API key is configured.
pub const EVM_LOG_LOOKBACK_BLOCKS: u64 = 2_000;

/// Token contract known to the engine on a given network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenContract {
    pub network: Network,
    pub symbol: &'static str,
    pub name: &'static str,
    /// Contract address (EVM hex, Tron base58) or SPL mint.
    pub contract: &'static str,
    pub decimals: u32,
}

/// USDT/USDC deployments. Decimals differ per chain: 6 on Ethereum, Tron and
/// Solana, 18 on BSC.
pub const TOKEN_CONTRACTS: [TokenContract; 8] = [
    TokenContract {
        network: Network::Ethereum,
        symbol: "USDT",
        name: "Tether USD",
        contract: "0xdac17f958d2ee523a2206206994597c13d831ec7",
        decimals: 6,
    },
    TokenContract {
        network: Network::Ethereum,
        symbol: "USDC",
        name: "USD Coin",
        contract: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        decimals: 6,
    },
    TokenContract {
        network: Network::Bsc,
        symbol: "USDT",
        name: "Tether USD",
        contract: "0x55d398326f99059ff775485246999027b3197955",
        decimals: 18,
    },
    TokenContract {
        network: Network::Bsc,
        symbol: "USDC",
        name: "USD Coin",
        contract: "0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d",
        decimals: 18,
    },
    TokenContract {
        network: Network::Tron,
        symbol: "USDT",
        name: "Tether USD",
        contract: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
        decimals: 6,
    },
    TokenContract {
        network: Network::Tron,
        symbol: "USDC",
        name: "USD Coin",
        contract: "TEkxiTehnzSmSe2XqrBj4w32RUN966rdz8",
        decimals: 6,
    },
    TokenContract {
        network: Network::Solana,
        symbol: "USDC",
        name: "USD Coin",
        contract: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
        decimals: 6,
    },
    TokenContract {
        network: Network::Solana,
        symbol: "USDT",
        name: "Tether USD",
        contract: "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY2mHnAYmR6sCnm7",
        decimals: 6,
    },
];

pub fn token_by_symbol(network: Network, symbol: &str) -> Option<&'static TokenContract> {
    TOKEN_CONTRACTS
        .iter()
        .find(|t| t.network == network && t.symbol.eq_ignore_ascii_case(symbol))
}

pub fn token_by_contract(network: Network, contract: &str) -> Option<&'static TokenContract> {
    TOKEN_CONTRACTS.iter().find(|t| {
        t.network == network
            && if network.is_evm() {
                t.contract.eq_ignore_ascii_case(contract)
            } else {
                t.contract == contract
            }
    })
}

pub fn tokens_for(network: Network) -> impl Iterator<Item = &'static TokenContract> {
    TOKEN_CONTRACTS.iter().filter(move |t| t.network == network)
}

/// Whether `symbol` can be received on `network` at all.
pub fn supports_asset(network: Network, symbol: &str) -> bool {
    network.is_native(symbol) || token_by_symbol(network, symbol).is_some()
}

/// Prices served when the price feed is unreachable.
pub const FALLBACK_PRICES: [(&str, f64); 8] = [
    ("BTC", 45_000.0),
    ("ETH", 2_500.0),
    ("BNB", 300.0),
    ("XRP", 0.5),
    ("SOL", 100.0),
    ("TRX", 0.1),
    ("USDT", 1.0),
    ("USDC", 1.0),
];

/// CoinGecko identifiers for every priced symbol.
pub const PRICE_FEED_IDS: [(&str, &str); 8] = [
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("BNB", "binancecoin"),
    ("XRP", "ripple"),
    ("SOL", "solana"),
    ("TRX", "tron"),
    ("USDT", "tether"),
    ("USDC", "usd-coin"),
];

/// Confirmation thresholds with optional operator overrides per network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    overrides: HashMap<Network, u32>,
}

impl ConfirmationPolicy {
    pub fn with_override(mut self, network: Network, confirmations: u32) -> Self {
        self.overrides.insert(network, confirmations);
        self
    }

    pub fn required(&self, network: Network) -> u32 {
        self.overrides
            .get(&network)
            .copied()
            .unwrap_or_else(|| required_confirmations(network))
    }

    pub fn is_final(&self, network: Network, confirmations: u32) -> bool {
        confirmations >= self.required(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn confirmation_table_is_fixed() {
        assert_eq!(required_confirmations(Network::Bitcoin), 1);
        assert_eq!(required_confirmations(Network::Ethereum), 12);
        assert_eq!(required_confirmations(Network::Bsc), 12);
        assert_eq!(required_confirmations(Network::Solana), 32);
        assert_eq!(required_confirmations(Network::Tron), 19);
        assert_eq!(required_confirmations(Network::Xrp), 1);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let policy = ConfirmationPolicy::default();
        for network in Network::iter() {
            let required = policy.required(network);
            assert!(policy.is_final(network, required));
            assert!(!policy.is_final(network, required - 1));
        }
    }

    #[test]
    fn overrides_replace_table_values() {
        let policy = ConfirmationPolicy::default().with_override(Network::Bitcoin, 6);
        assert_eq!(policy.required(Network::Bitcoin), 6);
        assert_eq!(policy.required(Network::Ethereum), 12);
    }

    #[test]
    fn stablecoins_get_cent_tolerance() {
        assert!(amounts_match("USDT", 100.0, 100.01));
        assert!(!amounts_match("usdt", 100.0, 100.02));
        assert!(amounts_match("BTC", 0.01, 0.010_000_5));
        assert!(!amounts_match("BTC", 0.01, 0.011));
    }

    #[test]
    fn token_decimals_diverge_between_chains() {
        assert_eq!(token_by_symbol(Network::Ethereum, "usdt").unwrap().decimals, 6);
        assert_eq!(token_by_symbol(Network::Bsc, "USDT").unwrap().decimals, 18);
        assert_eq!(token_by_symbol(Network::Tron, "USDT").unwrap().decimals, 6);
        assert!(token_by_symbol(Network::Bitcoin, "USDT").is_none());
    }

    #[test]
    fn evm_contract_lookup_ignores_case() {
        let token = token_by_contract(
            Network::Ethereum,
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        )
        .unwrap();
        assert_eq!(token.symbol, "USDC");
        assert!(supports_asset(Network::Bsc, "bnb"));
        assert!(!supports_asset(Network::Xrp, "USDT"));
    }
}
