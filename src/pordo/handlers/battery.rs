//! Door battery readout, proxied from the state sensor.

use crate::pordo::state::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// `level` is null when the sensor is missing, unreachable, or reports a
/// value outside 0..=100.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatteryStatus {
    pub level: Option<u8>,
}

#[utoipa::path(
    get,
    path = "/battery",
    responses((status = 200, description = "Battery percentage, null when unavailable", body = BatteryStatus)),
    tag = "door"
)]
pub async fn battery(Extension(state): Extension<Arc<AppState>>) -> Response {
    let level = state.home_assistant.battery_level().await;
    (StatusCode::OK, Json(BatteryStatus { level })).into_response()
}
