use actix_web::{web::Data, HttpResponse};

use super::{observe, ApiError};
use crate::state::AppState;

/// Prometheus text exposition of every engine counter and gauge.
pub async fn metrics_handler(state: Data<AppState>) -> Result<HttpResponse, ApiError> {
    let result = Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.telemetry().render_metrics()));
    observe("metrics", &result);
    result
}
