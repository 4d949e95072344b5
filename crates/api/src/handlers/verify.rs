use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use donation_watch_chains::VerificationRequest;

use super::{network_param, observe, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct VerifyRequest {
    pub tx_hash: String,
    pub network: String,
    pub expected_amount: f64,
    pub currency: String,
    /// Defaults to the configured donation address for `network`.
    #[serde(default)]
    pub expected_to_address: Option<String>,
}

pub async fn verify_handler(
    state: web::Data<AppState>,
    payload: web::Json<VerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    let result = verify(&state, payload.into_inner()).await;
    observe("verify", &result);
    result
}

async fn verify(state: &AppState, payload: VerifyRequest) -> Result<HttpResponse, ApiError> {
    let network = network_param(&payload.network)?;
    let configured = state.monitor().wallet(network);
    let (address, tag) = match payload.expected_to_address {
        Some(address) => (address, None),
        None => configured
            .map(|wallet| (wallet.address.clone(), wallet.destination_tag))
            .unwrap_or_default(),
    };

    let request = VerificationRequest::new(
        payload.tx_hash,
        network,
        payload.expected_amount,
        address,
        payload.currency,
    )
    .with_destination_tag(tag);
    let result = state.monitor().verifier().verify(&request).await?;
    Ok(HttpResponse::Ok().json(result))
}
