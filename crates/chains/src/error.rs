use donation_watch_domain::{Network, UnitError};
use thiserror::Error;

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failures surfaced at the adapter boundary.
///
/// The first seven variants describe an unavailable or misbehaving provider;
/// the remaining ones describe data that was fetched but cannot be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider responded with HTTP {0}")]
    Status(u16),
    #[error("provider rate limit reached")]
    RateLimited,
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("`{0}` is not configured and the public fallback is unavailable")]
    MissingApiKey(&'static str),
    #[error("no {currency} transfer could be decoded from transaction {hash}")]
    TransferNotDecoded { hash: String, currency: String },
    #[error("{currency} is not supported on {network}")]
    UnsupportedAsset { network: Network, currency: String },
}

impl AdapterError {
    /// Whether the error means "the provider could not answer" rather than
    /// "the provider answered and the data is unusable".
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Transport(_)
                | Self::Status(_)
                | Self::RateLimited
                | Self::Malformed(_)
                | Self::Rpc { .. }
                | Self::MissingApiKey(_)
        )
    }

    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::Malformed(detail.to_string())
    }

    pub fn not_decoded(hash: &str, currency: &str) -> Self {
        Self::TransferNotDecoded {
            hash: hash.to_string(),
            currency: currency.to_string(),
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<UnitError> for AdapterError {
    fn from(err: UnitError) -> Self {
        Self::Malformed(err.to_string())
    }
}
