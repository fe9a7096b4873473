//! Signed cookie sessions.
//!
//! The session cookie is the persisted mirror for session-scoped blocks and
//! the federated login state, so both survive process restarts and workers
//! that do not share the in-memory tables. Payloads are HMAC-SHA256 signed;
//! a bad signature decodes to a fresh empty session.

use crate::pordo::oidc::OidcLogin;
use anyhow::{Context, Result};
use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE_NAME: &str = "pordo_session";

// Matches the session store expiry the throttling identity relies on.
const SESSION_MAX_AGE_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Stable per-caller session id, minted on first contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Persisted mirror of the session block (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_until_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcLogin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminSession>,
}

impl SessionData {
    /// Persisted session block as a timestamp, if any.
    #[must_use]
    pub fn persisted_block(&self) -> Option<DateTime<Utc>> {
        self.blocked_until_ts
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Drop everything, session id included. Used against session fixation
    /// before storing freshly authenticated state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminSession {
    /// Present when the admin session came from a federated login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub login_time: DateTime<Utc>,
}

/// Holds the cookie signing key.
pub struct SessionKeyring {
    key: Vec<u8>,
}

impl SessionKeyring {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    /// Random per-process key. Sessions will not survive a restart and
    /// multi-worker deployments will disagree; callers warn about this.
    #[must_use]
    pub fn random() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Serialize and sign session data into a cookie value (`payload.tag`).
    ///
    /// # Errors
    /// Returns an error when the payload cannot be serialized.
    pub fn encode(&self, data: &SessionData) -> Result<String> {
        let payload = serde_json::to_vec(data).context("Failed to serialize session")?;
        let encoded = Base64UrlUnpadded::encode_string(&payload);
        let tag = Base64UrlUnpadded::encode_string(&self.mac(encoded.as_bytes()));
        Ok(format!("{encoded}.{tag}"))
    }

    /// Verify and deserialize a cookie value. Tampered, truncated, or
    /// otherwise unparseable values yield `None`.
    #[must_use]
    pub fn decode(&self, value: &str) -> Option<SessionData> {
        let (encoded, tag) = value.rsplit_once('.')?;
        let tag = Base64UrlUnpadded::decode_vec(tag).ok()?;

        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(encoded.as_bytes());
        mac.verify_slice(&tag).ok()?;

        let payload = Base64UrlUnpadded::decode_vec(encoded).ok()?;
        serde_json::from_slice(&payload).ok()
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Session from the request cookie, or a fresh one when absent/invalid.
#[must_use]
pub fn extract_session(headers: &HeaderMap, keyring: &SessionKeyring) -> SessionData {
    extract_session_cookie(headers)
        .and_then(|value| keyring.decode(&value))
        .unwrap_or_default()
}

/// Build a secure `HttpOnly` cookie carrying the signed session.
///
/// # Errors
/// Returns an error when serialization or header encoding fails.
pub fn session_cookie(
    keyring: &SessionKeyring,
    data: &SessionData,
    secure: bool,
) -> Result<HeaderValue> {
    let value = keyring.encode(data)?;
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_MAX_AGE_SECONDS}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).context("Failed to build session cookie header")
}

fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}
