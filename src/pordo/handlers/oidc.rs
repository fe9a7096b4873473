//! Federated login endpoints.

use super::{with_session, ApiResponse};
use crate::pordo::{
    oidc::OidcLogin,
    session::{extract_session, AdminSession},
    state::AppState,
};
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Set by the provider when the user cancelled or the request failed.
    #[serde(default)]
    pub error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/login",
    responses(
        (status = 302, description = "Redirect to the identity provider"),
        (status = 503, description = "Federated login not configured", body = ApiResponse)
    ),
    tag = "oidc"
)]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(client) = &state.oidc else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("Federated login is not configured")),
        )
            .into_response();
    };

    let mut session = extract_session(&headers, &state.keyring);
    match client.begin_login() {
        Ok((url, handshake)) => {
            session.oidc = Some(OidcLogin::AwaitingCallback(handshake));
            with_session(&state, &session, Redirect::to(url.as_str()).into_response())
        }
        Err(err) => {
            error!("Failed to build authorization redirect: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Internal server error")),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/oidc/callback",
    responses(
        (status = 302, description = "Login completed, redirect to the frontend"),
        (status = 401, description = "Callback rejected", body = ApiResponse),
        (status = 403, description = "Group policy rejected the user", body = ApiResponse)
    ),
    tag = "oidc"
)]
pub async fn callback(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(client) = &state.oidc else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("Federated login is not configured")),
        )
            .into_response();
    };

    let mut session = extract_session(&headers, &state.keyring);

    if let Some(provider_error) = query.error {
        warn!("Identity provider returned an error: {provider_error}");
        session.oidc = None;
        let response = (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Login was cancelled or failed")),
        )
            .into_response();
        return with_session(&state, &session, response);
    }

    // The handshake is single-use: taken here, it is gone whether the
    // callback validates or not.
    let Some(OidcLogin::AwaitingCallback(handshake)) = session.oidc.take() else {
        let response = (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("No login in progress")),
        )
            .into_response();
        return with_session(&state, &session, response);
    };

    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        let response = (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Missing code or state")),
        )
            .into_response();
        return with_session(&state, &session, response);
    };

    let now = Utc::now();
    match client
        .complete_login(&returned_state, &code, &handshake, now)
        .await
    {
        Ok(federated) => {
            info!(user = %federated.user, admin = federated.admin, "Federated login completed");
            // Fresh session against fixation; only the new login state
            // carries over.
            session.reset();
            if federated.admin {
                session.admin = Some(AdminSession {
                    user: Some(federated.user.clone()),
                    login_time: now,
                });
            }
            session.oidc = Some(OidcLogin::Authenticated(federated));
            with_session(&state, &session, Redirect::to("/").into_response())
        }
        Err(err) => {
            warn!("Federated login rejected: {err}");
            let status = if err.is_forbidden() {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::UNAUTHORIZED
            };
            let response = (status, Json(ApiResponse::error(err.to_string()))).into_response();
            with_session(&state, &session, response)
        }
    }
}

#[utoipa::path(
    get,
    path = "/oidc/logout",
    responses(
        (status = 302, description = "Session cleared, redirect to the provider or the frontend")
    ),
    tag = "oidc"
)]
pub async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let mut session = extract_session(&headers, &state.keyring);
    session.oidc = None;
    session.admin = None;

    let target = state
        .oidc
        .as_ref()
        .and_then(|client| client.end_session_endpoint())
        .unwrap_or("/");
    with_session(&state, &session, Redirect::to(target).into_response())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthStatus {
    pub oidc_enabled: bool,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub is_admin: bool,
    /// Whether the caller still has to present a PIN to open the door.
    pub pin_required: bool,
}

#[utoipa::path(
    get,
    path = "/auth/status",
    responses((status = 200, description = "Caller's authentication state", body = AuthStatus)),
    tag = "oidc"
)]
pub async fn status(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let session = extract_session(&headers, &state.keyring);
    let require_pin = state
        .oidc
        .as_ref()
        .is_none_or(|client| client.config().require_pin);

    let now = Utc::now();
    let federated = match &session.oidc {
        Some(OidcLogin::Authenticated(federated)) if !federated.expired(now) => Some(federated),
        _ => None,
    };

    let status = AuthStatus {
        oidc_enabled: state.oidc.is_some(),
        authenticated: federated.is_some(),
        user: federated.map(|federated| federated.user.clone()),
        is_admin: session.admin.is_some(),
        pin_required: federated.is_none() || require_pin,
    };
    (StatusCode::OK, Json(status)).into_response()
}
