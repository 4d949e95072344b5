use actix_web::{web, HttpResponse};

use super::{network_param, observe, ApiError};
use crate::state::AppState;

pub async fn wallets_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let portfolio = state.aggregator().refresh_all_wallets().await;
    let result = Ok(HttpResponse::Ok().json(portfolio));
    observe("wallets", &result);
    result
}

/// Refreshes a single network's wallet.
pub async fn wallet_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let result = match network_param(&path) {
        Ok(network) => state
            .aggregator()
            .fetch_wallet(network)
            .await
            .map(|snapshot| HttpResponse::Ok().json(snapshot))
            .map_err(ApiError::from),
        Err(err) => Err(err),
    };
    observe("wallet", &result);
    result
}

pub async fn prices_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let prices = state.monitor().prices().get_prices().await;
    let result = Ok(HttpResponse::Ok().json(prices.as_ref()));
    observe("prices", &result);
    result
}
