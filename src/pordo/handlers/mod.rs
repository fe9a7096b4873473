//! HTTP handlers.
//!
//! Handlers stay thin: extract the caller's identity material, run the
//! engine, translate the verdict into a status code, and re-sign the session
//! cookie on every response that may have mutated it.

use crate::pordo::{
    session::{self, SessionData},
    state::AppState,
};
use axum::{
    extract::ConnectInfo,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::error;
use utoipa::ToSchema;

pub mod admin;
pub mod battery;
pub mod health;
pub mod oidc;
pub mod open;

/// Response envelope shared by the decision endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse {
    pub status: &'static str,
    pub message: String,
    /// Epoch seconds, present while the caller is blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<i64>,
}

impl ApiResponse {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok",
            message: message.into(),
            blocked_until: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            blocked_until: None,
        }
    }

    #[must_use]
    pub fn blocked(message: impl Into<String>, blocked_until: Option<i64>) -> Self {
        Self {
            status: "blocked",
            message: message.into(),
            blocked_until,
        }
    }
}

/// Client IP as seen through the ingress: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, ConnectInfo(addr): &ConnectInfo<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    addr.ip().to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "user-agent")
}

pub(crate) fn accept_language(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "accept-language")
}

/// Attach the re-signed session cookie to a response. A signing failure is an
/// internal fault; the caller gets a generic 500 rather than a response with
/// stale session state.
pub(crate) fn with_session(
    state: &AppState,
    session: &SessionData,
    response: Response,
) -> Response {
    match session::session_cookie(&state.keyring, session, state.cookie_secure) {
        Ok(cookie) => {
            let mut response = response;
            response.headers_mut().insert(SET_COOKIE, cookie);
            response
        }
        Err(err) => {
            error!("Failed to sign session cookie: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Internal server error")),
            )
                .into_response()
        }
    }
}
