//! Liveness endpoint.

use crate::pordo::GIT_COMMIT_HASH;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Health {
    name: &'static str,
    version: &'static str,
    build: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = Health)),
    tag = "health"
)]
pub async fn health() -> Response {
    let short_hash = GIT_COMMIT_HASH.get(..7).unwrap_or("");

    let mut headers = HeaderMap::new();
    if let Ok(value) = format!(
        "{}:{}:{short_hash}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
    .parse()
    {
        headers.insert("X-App", value);
    }

    (
        StatusCode::OK,
        headers,
        Json(Health {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            build: GIT_COMMIT_HASH,
        }),
    )
        .into_response()
}
