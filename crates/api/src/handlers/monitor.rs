use actix_web::{web, HttpResponse};

use super::{observe, ApiError};
use crate::state::AppState;

pub async fn monitor_status_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let result = Ok(HttpResponse::Ok().json(state.monitor().get_monitoring_status()));
    observe("monitor_status", &result);
    result
}

/// Runs one check immediately, outside the schedule.
pub async fn monitor_check_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let report = state.monitor().check_for_new_donations().await;
    let result = Ok(HttpResponse::Ok().json(report));
    observe("monitor_check", &result);
    result
}
