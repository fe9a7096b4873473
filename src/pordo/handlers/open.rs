//! Door-open endpoint.

use super::{accept_language, client_ip, user_agent, with_session, ApiResponse};
use crate::pordo::{
    engine::{DenyReason, Verdict},
    session::extract_session,
    state::AppState,
};
use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/open-door",
    responses(
        (status = 200, description = "Door opened", body = ApiResponse),
        (status = 400, description = "PIN missing or malformed", body = ApiResponse),
        (status = 401, description = "Invalid PIN", body = ApiResponse),
        (status = 403, description = "Client rejected", body = ApiResponse),
        (status = 429, description = "Rate limited", body = ApiResponse),
        (status = 500, description = "Actuator error", body = ApiResponse),
        (status = 502, description = "Actuator unreachable", body = ApiResponse)
    ),
    tag = "door"
)]
pub async fn open(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    let ip = client_ip(&headers, &connect_info);
    let mut session = extract_session(&headers, &state.keyring);

    let payload = body.map(|Json(value)| value).unwrap_or_default();
    let pin = extract_pin(&payload);

    let verdict = state
        .engine
        .authorize(
            &ip,
            user_agent(&headers),
            accept_language(&headers),
            pin.as_deref(),
            &mut session,
            Utc::now(),
        )
        .await;

    let response = verdict_response(&verdict);
    with_session(&state, &session, response)
}

/// A present but non-string `pin` is still a guess, not a missing field: it
/// goes through format validation (and gets counted) instead of the
/// "PIN required" short-circuit.
fn extract_pin(payload: &serde_json::Value) -> Option<String> {
    match payload.get("pin") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(pin)) => Some(pin.clone()),
        Some(_) => Some(String::new()),
    }
}

fn verdict_response(verdict: &Verdict) -> Response {
    match verdict {
        Verdict::Granted { .. } => {
            (StatusCode::OK, Json(ApiResponse::ok("Door opened"))).into_response()
        }
        Verdict::Denied(reason) => deny_response(reason),
        Verdict::RateLimited {
            global: true,
            ..
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::blocked(
                "Service temporarily unavailable. Try again later.",
                None,
            )),
        )
            .into_response(),
        Verdict::RateLimited { blocked_until, .. } => {
            let blocked_until = *blocked_until;
            let minutes = blocked_until.map_or(0, minutes_until);
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiResponse::blocked(
                    format!("Too many attempts. Try again in {minutes} minute(s)."),
                    blocked_until.map(|until| until.timestamp()),
                )),
            )
                .into_response()
        }
    }
}

fn minutes_until(until: chrono::DateTime<Utc>) -> i64 {
    ((until - Utc::now()).num_seconds().max(0) as u64).div_ceil(60) as i64
}

fn deny_response(reason: &DenyReason) -> Response {
    let (status, message) = match reason {
        DenyReason::Suspicious => (StatusCode::FORBIDDEN, "Access denied".to_string()),
        DenyReason::PinRequired => (StatusCode::BAD_REQUEST, "PIN required".to_string()),
        DenyReason::InvalidFormat => {
            (StatusCode::BAD_REQUEST, "PIN must be 4-8 digits".to_string())
        }
        // The guess that triggers a block is still an invalid credential,
        // not a rate-limit response; 429 is for pre-existing blocks.
        DenyReason::InvalidCredential {
            blocked_until: Some(until),
            ..
        } => {
            let minutes = minutes_until(*until);
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse {
                    status: "error",
                    message: format!("Invalid PIN. Blocked for {minutes} minute(s)."),
                    blocked_until: Some(until.timestamp()),
                }),
            )
                .into_response();
        }
        DenyReason::InvalidCredential {
            remaining_attempts,
            blocked_until: None,
        } => (
            StatusCode::UNAUTHORIZED,
            format!("Invalid PIN. {remaining_attempts} attempts remaining."),
        ),
        DenyReason::AdminDisabled => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Admin access is not configured".to_string(),
        ),
        DenyReason::Upstream { status } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to open door (upstream status {status})"),
        ),
        DenyReason::UpstreamUnreachable => (
            StatusCode::BAD_GATEWAY,
            "Failed to contact Home Assistant".to_string(),
        ),
    };
    (status, Json(ApiResponse::error(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pin_extraction_distinguishes_missing_from_malformed() {
        // Absent or null: the request is malformed, not a guess.
        assert_eq!(extract_pin(&json!({})), None);
        assert_eq!(extract_pin(&json!({ "pin": null })), None);

        assert_eq!(extract_pin(&json!({ "pin": "1234" })), Some("1234".to_string()));

        // Wrong-typed values go through format validation and get counted.
        assert_eq!(extract_pin(&json!({ "pin": 1234 })), Some(String::new()));
        assert_eq!(extract_pin(&json!({ "pin": ["1", "2"] })), Some(String::new()));
    }

    #[test]
    fn verdicts_map_to_status_codes() {
        let cases = [
            (
                Verdict::Granted {
                    user: "alice".to_string(),
                },
                StatusCode::OK,
            ),
            (
                Verdict::Denied(DenyReason::Suspicious),
                StatusCode::FORBIDDEN,
            ),
            (
                Verdict::Denied(DenyReason::PinRequired),
                StatusCode::BAD_REQUEST,
            ),
            (
                Verdict::Denied(DenyReason::InvalidFormat),
                StatusCode::BAD_REQUEST,
            ),
            (
                Verdict::Denied(DenyReason::InvalidCredential {
                    remaining_attempts: 2,
                    blocked_until: None,
                }),
                StatusCode::UNAUTHORIZED,
            ),
            // The failure that triggers a block stays a 401, not a 429.
            (
                Verdict::Denied(DenyReason::InvalidCredential {
                    remaining_attempts: 0,
                    blocked_until: Some(Utc::now() + chrono::Duration::minutes(5)),
                }),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Verdict::Denied(DenyReason::Upstream { status: 500 }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                Verdict::Denied(DenyReason::UpstreamUnreachable),
                StatusCode::BAD_GATEWAY,
            ),
            (
                Verdict::RateLimited {
                    blocked_until: None,
                    global: true,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                Verdict::RateLimited {
                    blocked_until: Some(Utc::now() + chrono::Duration::minutes(5)),
                    global: false,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];

        for (verdict, expected) in cases {
            assert_eq!(verdict_response(&verdict).status(), expected, "{verdict:?}");
        }
    }
}
