pub mod donations;
pub mod metrics;
pub mod monitor;
pub mod verify;
pub mod wallets;

pub use donations::{create_crypto_donation_handler, submit_transaction_handler};
pub use metrics::metrics_handler;
pub use monitor::{monitor_check_handler, monitor_status_handler};
pub use verify::verify_handler;
pub use wallets::{prices_handler, wallet_handler, wallets_handler};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use ::metrics::counter;
use serde::Serialize;
use thiserror::Error;

use donation_watch_chains::{AggregateError, VerifyError};
use donation_watch_domain::config::{parse_network, ConfigError};
use donation_watch_domain::storage::StorageError;
use donation_watch_domain::{DonationId, DonationStatus, Network};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidNetwork(ConfigError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("donation not found")]
    NotFound,
    #[error("donation is already {0}")]
    NotPending(DonationStatus),
    #[error("transaction is already recorded as donation {0}")]
    AlreadyCredited(DonationId),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidNetwork(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotPending(_) | ApiError::AlreadyCredited(_) => StatusCode::CONFLICT,
            ApiError::Verify(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Aggregate(AggregateError::Adapter { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Aggregate(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub(crate) fn network_param(raw: &str) -> Result<Network, ApiError> {
    parse_network(raw).map_err(ApiError::InvalidNetwork)
}

/// Counts one request under `api_requests_total` by endpoint and status code.
pub(crate) fn observe<T>(endpoint: &'static str, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(err) => err.status_code(),
    };
    counter!(
        "api_requests_total",
        "endpoint" => endpoint,
        "status" => status.as_str().to_owned()
    )
    .increment(1);
}
