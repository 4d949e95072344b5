//! Environment-driven configuration structures shared by all binaries.

use std::{env, str::FromStr, time::Duration};

use strum::IntoEnumIterator;
use thiserror::Error;

use crate::model::{Network, WalletAddress};
use crate::policy::{
    ConfirmationPolicy, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PENDING_FAILURE_CUTOFF_HOURS,
    DEFAULT_POLL_INTERVAL_MINUTES,
};

const SKIP_DOTENV_VAR: &str = "DONATION_WATCH_SKIP_DOTENV";
const MAX_HTTP_TIMEOUT_SECS: u64 = 60;

/// API-specific configuration (HTTP bind + shared database) so the HTTP
/// surface does not depend on monitor-only environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database_url: String,
    api_bind_address: String,
    internal_bind_address: Option<String>,
}

impl ApiConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            internal_bind_address: get_optional_var("API_INTERNAL_BIND_ADDRESS"),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn internal_bind_address(&self) -> Option<&str> {
        self.internal_bind_address.as_deref()
    }

    pub fn has_internal_listener(&self) -> bool {
        self.internal_bind_address.is_some()
    }
}

/// Explorer and RPC base URLs, one per upstream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoints {
    pub bitcoin_api_url: String,
    pub ethereum_rpc_url: String,
    pub etherscan_api_url: String,
    pub bsc_rpc_url: String,
    pub bscscan_api_url: String,
    pub xrp_rpc_url: String,
    pub solana_rpc_url: String,
    pub tron_api_url: String,
    pub price_api_url: String,
}

impl Default for ChainEndpoints {
    fn default() -> Self {
        Self {
            bitcoin_api_url: "https://blockstream.info/api".into(),
            ethereum_rpc_url: "https://ethereum-rpc.publicnode.com".into(),
            etherscan_api_url: "https://api.etherscan.io/api".into(),
            bsc_rpc_url: "https://bsc-dataseed.binance.org".into(),
            bscscan_api_url: "https://api.bscscan.com/api".into(),
            xrp_rpc_url: "https://s1.ripple.com:51234".into(),
            solana_rpc_url: "https://api.mainnet-beta.solana.com".into(),
            tron_api_url: "https://api.trongrid.io".into(),
            price_api_url: "https://api.coingecko.com/api/v3".into(),
        }
    }
}

impl ChainEndpoints {
    fn from_env() -> Self {
        let defaults = Self::default();
        let pick = |key: &'static str, fallback: String| get_optional_var(key).unwrap_or(fallback);
        Self {
            bitcoin_api_url: pick("BITCOIN_API_URL", defaults.bitcoin_api_url),
            ethereum_rpc_url: pick("ETHEREUM_RPC_URL", defaults.ethereum_rpc_url),
            etherscan_api_url: pick("ETHERSCAN_API_URL", defaults.etherscan_api_url),
            bsc_rpc_url: pick("BSC_RPC_URL", defaults.bsc_rpc_url),
            bscscan_api_url: pick("BSCSCAN_API_URL", defaults.bscscan_api_url),
            xrp_rpc_url: pick("XRP_RPC_URL", defaults.xrp_rpc_url),
            solana_rpc_url: pick("SOLANA_RPC_URL", defaults.solana_rpc_url),
            tron_api_url: pick("TRON_API_URL", defaults.tron_api_url),
            price_api_url: pick("PRICE_API_URL", defaults.price_api_url),
        }
    }
}

/// Optional keys for rate-limited explorers. Absence switches the affected
/// adapter to its public fallback path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeys {
    pub etherscan: Option<String>,
    pub bscscan: Option<String>,
    pub trongrid: Option<String>,
}

/// Configuration shared by the monitor binary and the API process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    database_url: String,
    wallets: Vec<WalletAddress>,
    endpoints: ChainEndpoints,
    api_keys: ApiKeys,
    monitor_interval_minutes: u64,
    http_timeout: Duration,
    pending_failure_cutoff_hours: i64,
    confirmations: ConfirmationPolicy,
}

impl BootstrapConfig {
    /// Starts from defaults with every wallet unconfigured.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            wallets: Network::iter().map(|n| WalletAddress::new(n, "")).collect(),
            endpoints: ChainEndpoints::default(),
            api_keys: ApiKeys::default(),
            monitor_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            pending_failure_cutoff_hours: DEFAULT_PENDING_FAILURE_CUTOFF_HOURS,
            confirmations: ConfirmationPolicy::default(),
        }
    }

    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// process variables. Missing or malformed entries surface as
    /// `ConfigError`.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let mut config = Self::new(get_required_var("DATABASE_URL")?);
        for network in Network::iter() {
            let key = address_var(network);
            let address = get_optional_var(key).unwrap_or_default();
            let mut wallet = WalletAddress::new(network, address);
            if network == Network::Xrp {
                wallet = wallet.with_destination_tag(parse_optional("XRP_DESTINATION_TAG")?);
            }
            config = config.with_wallet(wallet);

            if let Some(required) = parse_optional::<u32>(confirmations_var(network))? {
                config.confirmations = config.confirmations.with_override(network, required);
            }
        }

        config.endpoints = ChainEndpoints::from_env();
        config.api_keys = ApiKeys {
            etherscan: get_optional_var("ETHERSCAN_API_KEY"),
            bscscan: get_optional_var("BSCSCAN_API_KEY"),
            trongrid: get_optional_var("TRONGRID_API_KEY"),
        };
        if let Some(minutes) = parse_optional::<u64>("MONITOR_INTERVAL_MINUTES")? {
            config.monitor_interval_minutes = minutes.max(1);
        }
        if let Some(secs) = parse_optional::<u64>("HTTP_TIMEOUT_SECS")? {
            config.http_timeout = Duration::from_secs(secs.clamp(1, MAX_HTTP_TIMEOUT_SECS));
        }
        if let Some(hours) = parse_optional::<i64>("PENDING_FAILURE_CUTOFF_HOURS")? {
            config.pending_failure_cutoff_hours = hours.max(0);
        }

        Ok(config)
    }

    /// Replaces the wallet configured for `wallet.network`.
    pub fn with_wallet(mut self, wallet: WalletAddress) -> Self {
        match self.wallets.iter_mut().find(|w| w.network == wallet.network) {
            Some(slot) => *slot = wallet,
            None => self.wallets.push(wallet),
        }
        self
    }

    pub fn with_endpoints(mut self, endpoints: ChainEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_api_keys(mut self, api_keys: ApiKeys) -> Self {
        self.api_keys = api_keys;
        self
    }

    pub fn with_confirmations(mut self, policy: ConfirmationPolicy) -> Self {
        self.confirmations = policy;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Every network's wallet, configured or not.
    pub fn wallets(&self) -> &[WalletAddress] {
        &self.wallets
    }

    pub fn wallet(&self, network: Network) -> Option<&WalletAddress> {
        self.wallets.iter().find(|w| w.network == network)
    }

    pub fn configured_wallets(&self) -> impl Iterator<Item = &WalletAddress> {
        self.wallets.iter().filter(|w| w.is_configured())
    }

    pub fn endpoints(&self) -> &ChainEndpoints {
        &self.endpoints
    }

    pub fn api_keys(&self) -> &ApiKeys {
        &self.api_keys
    }

    pub fn monitor_interval_minutes(&self) -> u64 {
        self.monitor_interval_minutes
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn pending_failure_cutoff(&self) -> chrono::Duration {
        chrono::Duration::hours(self.pending_failure_cutoff_hours)
    }

    pub fn confirmations(&self) -> &ConfirmationPolicy {
        &self.confirmations
    }
}

/// Parses a user-supplied network name, mapping failures onto `ConfigError`.
pub fn parse_network(value: &str) -> Result<Network, ConfigError> {
    Network::from_str(value.trim()).map_err(|_| ConfigError::UnknownNetwork {
        value: value.trim().to_string(),
    })
}

fn address_var(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "BITCOIN_DONATION_ADDRESS",
        Network::Ethereum => "ETHEREUM_DONATION_ADDRESS",
        Network::Bsc => "BSC_DONATION_ADDRESS",
        Network::Xrp => "XRP_DONATION_ADDRESS",
        Network::Solana => "SOLANA_DONATION_ADDRESS",
        Network::Tron => "TRON_DONATION_ADDRESS",
    }
}

fn confirmations_var(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "BITCOIN_REQUIRED_CONFIRMATIONS",
        Network::Ethereum => "ETHEREUM_REQUIRED_CONFIRMATIONS",
        Network::Bsc => "BSC_REQUIRED_CONFIRMATIONS",
        Network::Xrp => "XRP_REQUIRED_CONFIRMATIONS",
        Network::Solana => "SOLANA_REQUIRED_CONFIRMATIONS",
        Network::Tron => "TRON_REQUIRED_CONFIRMATIONS",
    }
}

fn parse_optional<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    get_optional_var(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|source| ConfigError::InvalidNumber { key, source })
        })
        .transpose()
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

pub(crate) fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os(SKIP_DOTENV_VAR).is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("unsupported network `{value}`")]
    UnknownNetwork { value: String },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
