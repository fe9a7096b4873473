//! Admin console endpoints: password login and user management.

use super::{accept_language, client_ip, user_agent, with_session, ApiResponse};
use crate::pordo::{
    audit::{AttemptEvent, AttemptStatus},
    engine::{DenyReason, Verdict},
    session::{extract_session, SessionData},
    state::AppState,
    users::{DirectoryError, UserSummary},
};
use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminAuthRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub username: String,
    pub pin: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserSummary>,
}

#[utoipa::path(
    post,
    path = "/admin/auth",
    request_body = AdminAuthRequest,
    responses(
        (status = 200, description = "Authenticated", body = ApiResponse),
        (status = 401, description = "Wrong password", body = ApiResponse),
        (status = 429, description = "Rate limited", body = ApiResponse),
        (status = 503, description = "Password login not configured", body = ApiResponse)
    ),
    tag = "admin"
)]
pub async fn auth(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<AdminAuthRequest>>,
) -> Response {
    let ip = client_ip(&headers, &connect_info);
    let mut session = extract_session(&headers, &state.keyring);
    let password = body.map(|Json(body)| body.password).unwrap_or_default();

    let verdict = state
        .engine
        .authorize_admin(
            &ip,
            user_agent(&headers),
            accept_language(&headers),
            &password,
            &mut session,
            Utc::now(),
        )
        .await;

    let response = match verdict {
        Verdict::Granted { .. } => {
            (StatusCode::OK, Json(ApiResponse::ok("Authenticated"))).into_response()
        }
        Verdict::Denied(DenyReason::AdminDisabled) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("Admin access is not configured")),
        )
            .into_response(),
        Verdict::Denied(DenyReason::InvalidCredential {
            blocked_until: Some(until),
            ..
        }) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse {
                status: "error",
                message: "Invalid password. Blocked.".to_string(),
                blocked_until: Some(until.timestamp()),
            }),
        )
            .into_response(),
        Verdict::Denied(DenyReason::InvalidCredential {
            remaining_attempts,
            blocked_until: None,
        }) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error(format!(
                "Invalid password. {remaining_attempts} attempts remaining."
            ))),
        )
            .into_response(),
        Verdict::Denied(_) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Authentication failed")),
        )
            .into_response(),
        Verdict::RateLimited { global: true, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::blocked(
                "Service temporarily unavailable. Try again later.",
                None,
            )),
        )
            .into_response(),
        Verdict::RateLimited { blocked_until, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::blocked(
                "Too many attempts. Try again later.",
                blocked_until.map(|until| until.timestamp()),
            )),
        )
            .into_response(),
    };
    with_session(&state, &session, response)
}

#[utoipa::path(
    get,
    path = "/admin/check-auth",
    responses(
        (status = 200, description = "Admin session active"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "admin"
)]
pub async fn check_auth(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let session = extract_session(&headers, &state.keyring);
    match &session.admin {
        Some(admin) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "authenticated": true,
                "user": admin.user,
            })),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "authenticated": false })),
        )
            .into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/admin/logout",
    responses((status = 200, description = "Admin session cleared", body = ApiResponse)),
    tag = "admin"
)]
pub async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let mut session = extract_session(&headers, &state.keyring);
    session.admin = None;
    let response = (StatusCode::OK, Json(ApiResponse::ok("Logged out"))).into_response();
    with_session(&state, &session, response)
}

#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "Configured and stored users", body = UserListResponse),
        (status = 401, description = "Not authenticated", body = ApiResponse)
    ),
    tag = "admin"
)]
pub async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let session = extract_session(&headers, &state.keyring);
    if let Err(denied) = require_admin(&session) {
        return denied;
    }
    (
        StatusCode::OK,
        Json(UserListResponse {
            users: state.users.list_users(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = ApiResponse),
        (status = 400, description = "Invalid username or PIN", body = ApiResponse),
        (status = 401, description = "Not authenticated", body = ApiResponse),
        (status = 409, description = "Username or PIN already taken", body = ApiResponse)
    ),
    tag = "admin"
)]
pub async fn create_user(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateUserRequest>,
) -> Response {
    let session = extract_session(&headers, &state.keyring);
    if let Err(denied) = require_admin(&session) {
        return denied;
    }

    let username = body.username.trim();
    if username.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Username required")),
        )
            .into_response();
    }

    match state.users.create_user(username, &body.pin, body.active) {
        Ok(()) => {
            record_admin_op(
                &state,
                &client_ip(&headers, &connect_info),
                &session,
                AttemptStatus::AdminUserCreate,
                format!("created {username}"),
            );
            (StatusCode::CREATED, Json(ApiResponse::ok("User created"))).into_response()
        }
        Err(err) => directory_error_response(&err),
    }
}

#[utoipa::path(
    put,
    path = "/admin/users/{username}",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = ApiResponse),
        (status = 401, description = "Not authenticated", body = ApiResponse),
        (status = 403, description = "User is read-only", body = ApiResponse),
        (status = 404, description = "Unknown user", body = ApiResponse)
    ),
    tag = "admin"
)]
pub async fn update_user(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: ConnectInfo<SocketAddr>,
    Path(username): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateUserRequest>,
) -> Response {
    let session = extract_session(&headers, &state.keyring);
    if let Err(denied) = require_admin(&session) {
        return denied;
    }

    match state
        .users
        .update_user(&username, body.pin.as_deref(), body.active)
    {
        Ok(()) => {
            record_admin_op(
                &state,
                &client_ip(&headers, &connect_info),
                &session,
                AttemptStatus::AdminUserUpdate,
                format!("updated {username}"),
            );
            (StatusCode::OK, Json(ApiResponse::ok("User updated"))).into_response()
        }
        Err(err) => directory_error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/admin/users/{username}",
    responses(
        (status = 200, description = "User deleted", body = ApiResponse),
        (status = 401, description = "Not authenticated", body = ApiResponse),
        (status = 403, description = "User is read-only", body = ApiResponse),
        (status = 404, description = "Unknown user", body = ApiResponse)
    ),
    tag = "admin"
)]
pub async fn delete_user(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: ConnectInfo<SocketAddr>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Response {
    let session = extract_session(&headers, &state.keyring);
    if let Err(denied) = require_admin(&session) {
        return denied;
    }

    match state.users.delete_user(&username) {
        Ok(()) => {
            record_admin_op(
                &state,
                &client_ip(&headers, &connect_info),
                &session,
                AttemptStatus::AdminUserDelete,
                format!("deleted {username}"),
            );
            (StatusCode::OK, Json(ApiResponse::ok("User deleted"))).into_response()
        }
        Err(err) => directory_error_response(&err),
    }
}

fn require_admin(session: &SessionData) -> Result<(), Response> {
    if session.admin.is_some() {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Admin authentication required")),
        )
            .into_response())
    }
}

fn directory_error_response(err: &DirectoryError) -> Response {
    let status = match err {
        DirectoryError::Exists | DirectoryError::DuplicatePin => StatusCode::CONFLICT,
        DirectoryError::NotFound => StatusCode::NOT_FOUND,
        DirectoryError::ReadOnly => StatusCode::FORBIDDEN,
        DirectoryError::InvalidPin => StatusCode::BAD_REQUEST,
        DirectoryError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(err.to_string()))).into_response()
}

fn record_admin_op(
    state: &AppState,
    ip: &str,
    session: &SessionData,
    status: AttemptStatus,
    details: String,
) {
    let user = session
        .admin
        .as_ref()
        .and_then(|admin| admin.user.as_deref());
    state.audit.record(&AttemptEvent {
        ip,
        session_id: session.sid.as_deref().unwrap_or("-"),
        user: Some(user.unwrap_or("admin")),
        status,
        details,
    });
}
