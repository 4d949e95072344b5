use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use donation_watch_chains::{VerificationRequest, VerifyError};
use donation_watch_domain::{
    policy, DonationId, DonationMetadata, DonationStatus, NewDonation, StatusUpdate,
    VerificationResult,
};

use super::{network_param, observe, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct CryptoDonationRequest {
    pub amount: f64,
    pub currency: String,
    pub network: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CryptoDonationResponse {
    pub id: DonationId,
    pub address: String,
    pub destination_tag: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitTransactionRequest {
    pub tx_hash: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitTransactionResponse {
    pub donation_id: DonationId,
    pub status: DonationStatus,
    pub verification: VerificationResult,
}

/// Records a pending crypto donation intent and tells the donor where to pay.
pub async fn create_crypto_donation_handler(
    state: web::Data<AppState>,
    payload: web::Json<CryptoDonationRequest>,
) -> Result<HttpResponse, ApiError> {
    let result = create_intent(&state, payload.into_inner()).await;
    observe("create_crypto_donation", &result);
    result
}

async fn create_intent(
    state: &AppState,
    payload: CryptoDonationRequest,
) -> Result<HttpResponse, ApiError> {
    let network = network_param(&payload.network)?;
    if !payload.amount.is_finite() || payload.amount <= 0.0 {
        return Err(ApiError::InvalidRequest("amount must be positive".into()));
    }
    let currency = payload.currency.trim().to_ascii_uppercase();
    if !policy::supports_asset(network, &currency) {
        return Err(VerifyError::UnsupportedAsset { network, currency }.into());
    }
    let wallet = state
        .monitor()
        .wallet(network)
        .cloned()
        .ok_or(VerifyError::MissingAddress(network))?;

    let prices = state.monitor().prices().get_prices().await;
    let id = state
        .storage()
        .create(NewDonation {
            amount: payload.amount,
            amount_usd: prices.to_usd(&currency, payload.amount).unwrap_or(0.0),
            currency,
            network: Some(network),
            status: DonationStatus::Pending,
            tx_hash: None,
            confirmations: 0,
            metadata: Some(DonationMetadata::Crypto {
                network,
                wallet_address: wallet.address.clone(),
                from_address: None,
                destination_tag: wallet.destination_tag,
            }),
            created_at: Utc::now(),
        })
        .await?
        .id();
    info!(%id, network = %network, "crypto donation intent created");

    Ok(HttpResponse::Created().json(CryptoDonationResponse {
        id,
        address: wallet.address,
        destination_tag: wallet.destination_tag,
    }))
}

/// Verifies a donor-submitted hash against a pending intent.
pub async fn submit_transaction_handler(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<SubmitTransactionRequest>,
) -> Result<HttpResponse, ApiError> {
    let result = submit_transaction(&state, DonationId(path.into_inner()), payload.into_inner()).await;
    observe("submit_transaction", &result);
    result
}

async fn submit_transaction(
    state: &AppState,
    id: DonationId,
    payload: SubmitTransactionRequest,
) -> Result<HttpResponse, ApiError> {
    if payload.tx_hash.trim().is_empty() {
        return Err(ApiError::InvalidRequest("tx_hash must not be empty".into()));
    }
    let donation = state
        .storage()
        .find_donation(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if donation.status != DonationStatus::Pending {
        return Err(ApiError::NotPending(donation.status));
    }
    let (Some(network), Some(DonationMetadata::Crypto { wallet_address, destination_tag, .. })) =
        (donation.network, donation.metadata.as_ref())
    else {
        return Err(ApiError::InvalidRequest(format!("donation {id} is not a crypto donation")));
    };
    let tx_hash = network.canonical_hash(&payload.tx_hash);
    if let Some(credited) = state.storage().find_by_tx_hash(network, &tx_hash).await? {
        if credited.id != id {
            return Err(ApiError::AlreadyCredited(credited.id));
        }
    }

    let request = VerificationRequest::new(
        tx_hash.as_str(),
        network,
        donation.amount,
        wallet_address.as_str(),
        donation.currency.as_str(),
    )
    .with_destination_tag(*destination_tag);
    let verification = state.monitor().verifier().verify(&request).await?;

    let status = if verification.is_verified() {
        DonationStatus::Completed
    } else if verification.manual_review_required {
        DonationStatus::Pending
    } else {
        return Ok(HttpResponse::Ok().json(SubmitTransactionResponse {
            donation_id: id,
            status: donation.status,
            verification,
        }));
    };

    state
        .storage()
        .update_status(StatusUpdate {
            id,
            status,
            tx_hash: Some(tx_hash),
            confirmations: Some(verification.confirmations),
        })
        .await?;
    info!(%id, %status, "donation transaction submitted");

    Ok(HttpResponse::Ok().json(SubmitTransactionResponse {
        donation_id: id,
        status,
        verification,
    }))
}
