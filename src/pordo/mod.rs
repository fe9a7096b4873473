//! Server wiring: configuration to router to listener.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::{header, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Extension, Router,
};
use chrono::{Duration, Utc};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;

pub mod actuator;
pub mod audit;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod identity;
pub mod oidc;
pub mod pin;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod users;

use actuator::HomeAssistant;
use audit::LogAuditSink;
use config::Options;
use engine::{AccessEngine, EnginePolicy};
use oidc::{OidcClient, OidcConfig};
use rate_limit::{RateLimitConfig, RateLimitStore};
use session::SessionKeyring;
use state::AppState;
use users::UserDirectory;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

const OUTBOUND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, options: Options) -> Result<()> {
    if let Some(tz) = &options.tz {
        std::env::set_var("TZ", tz);
    }

    let keyring = match options.secret_key.as_deref().filter(|key| !key.is_empty()) {
        Some(secret) => SessionKeyring::new(secret),
        None => {
            warn!("No secret_key configured, sessions will not survive a restart");
            SessionKeyring::random()
        }
    };

    if options.test_mode {
        warn!("Test mode enabled, the door actuator will not be contacted");
    }

    let users = Arc::new(UserDirectory::load(
        &options.users_store_path,
        options.users.clone(),
    ));

    let home_assistant = Arc::new(
        HomeAssistant::new(
            &options.ha_url,
            SecretString::from(options.ha_token.clone()),
            options.entity_id.clone(),
            options.battery_entity(),
        )
        .context("Failed to build Home Assistant client")?,
    );

    let oidc = federated_client(&options).await;

    let store = RateLimitStore::new(
        RateLimitConfig {
            max_attempts: options.max_attempts,
            session_max_attempts: options.session_max_attempts,
            max_global_attempts_per_hour: options.max_global_attempts_per_hour,
            block_time: Duration::minutes(i64::from(options.block_time_minutes)),
        },
        Utc::now(),
    );

    let audit: Arc<dyn audit::AuditSink> = Arc::new(LogAuditSink);
    let policy = EnginePolicy {
        require_pin_for_oidc: options
            .oidc
            .as_ref()
            .is_some_and(|oidc| oidc.require_pin_for_oidc),
        test_mode: options.test_mode,
        admin_password: SecretString::from(options.admin_password.clone()),
    };
    let engine = AccessEngine::new(store, users.clone(), home_assistant.clone(), audit.clone(), policy);

    let state = Arc::new(AppState {
        engine,
        keyring,
        users,
        audit,
        oidc,
        home_assistant,
        cookie_secure: options.session_cookie_secure,
    });

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/open-door", post(handlers::open::open))
        .route("/battery", get(handlers::battery::battery))
        .route("/health", get(handlers::health::health))
        .route("/login", get(handlers::oidc::login))
        .route("/oidc/callback", get(handlers::oidc::callback))
        .route("/oidc/logout", get(handlers::oidc::logout))
        .route("/auth/status", get(handlers::oidc::status))
        .route("/admin/auth", post(handlers::admin::auth))
        .route("/admin/check-auth", get(handlers::admin::check_auth))
        .route("/admin/logout", post(handlers::admin::logout))
        .route(
            "/admin/users",
            get(handlers::admin::list_users).post(handlers::admin::create_user),
        )
        .route(
            "/admin/users/:username",
            put(handlers::admin::update_user).delete(handlers::admin::delete_user),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(middleware::from_fn(security_headers))
                .layer(Extension(state)),
        )
}

/// Build the federated login client when it is enabled and complete.
/// Discovery failures disable federated login rather than blocking startup;
/// PIN auth still works.
async fn federated_client(options: &Options) -> Option<OidcClient> {
    let oidc = options.oidc.as_ref()?;
    if !oidc.enabled {
        return None;
    }

    let (Some(issuer), Some(client_id), Some(client_secret), Some(redirect_uri)) = (
        oidc.issuer.clone(),
        oidc.client_id.clone(),
        oidc.client_secret.clone(),
        oidc.redirect_uri.clone(),
    ) else {
        warn!("Federated login enabled but missing issuer/client_id/client_secret/redirect_uri, disabling");
        return None;
    };

    let config = OidcConfig {
        issuer,
        client_id,
        client_secret: SecretString::from(client_secret),
        redirect_uri,
        admin_group: oidc.admin_group.clone(),
        user_group: oidc.user_group.clone(),
        require_pin: oidc.require_pin_for_oidc,
        public_key: oidc.public_key.clone(),
    };

    let http = match reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(OUTBOUND_TIMEOUT)
        .build()
    {
        Ok(http) => http,
        Err(err) => {
            warn!("Failed to build HTTP client for federated login: {err}");
            return None;
        }
    };

    match OidcClient::discover(config, http).await {
        Ok(client) => {
            info!("Federated login enabled");
            Some(client)
        }
        Err(err) => {
            warn!("Federated login discovery failed, disabling: {err:#}");
            None
        }
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
