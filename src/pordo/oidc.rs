//! OpenID Connect login handshake.
//!
//! Two phases: a redirect carrying freshly minted `state`/`nonce`/PKCE
//! values, then a callback that walks a fail-closed validation sequence.
//! The in-flight state lives in the signed session as `OidcLogin`; any
//! validation failure discards it.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Clock skew allowance for `exp`/`nbf` checks.
const LEEWAY_SECONDS: i64 = 60;

const SCOPES: &str = "openid email profile groups";

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("Invalid state")]
    StateMismatch,
    #[error("Token exchange failed")]
    Exchange(#[source] reqwest::Error),
    #[error("Token endpoint returned {0}")]
    ExchangeStatus(u16),
    #[error("No identity claims in token response")]
    MissingClaims,
    #[error("ID token validation error")]
    Signature(#[source] jsonwebtoken::errors::Error),
    #[error("Invalid nonce")]
    NonceMismatch,
    #[error("Invalid audience")]
    Audience,
    #[error("Invalid issuer")]
    Issuer,
    #[error("Token has expired")]
    Expired,
    #[error("Token not yet valid")]
    NotYetValid,
    #[error("Access denied: No groups found")]
    NoGroups,
    #[error("Access denied: User not in allowed group")]
    GroupDenied,
}

impl OidcError {
    /// Group-policy rejections are forbidden (403); everything else in the
    /// sequence is an authorization failure (401).
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::NoGroups | Self::GroupDenied)
    }
}

#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub admin_group: Option<String>,
    pub user_group: Option<String>,
    pub require_pin: bool,
    /// PEM public key; when set, the ID token signature is verified.
    pub public_key: Option<String>,
}

/// Federated login state persisted in the signed session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OidcLogin {
    AwaitingCallback(Handshake),
    Authenticated(FederatedSession),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FederatedSession {
    pub user: String,
    pub groups: Vec<String>,
    /// ID token expiry, epoch seconds; re-checked on every privileged use.
    pub exp: i64,
    pub admin: bool,
}

impl FederatedSession {
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Endpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// Audience claim: a single value or a list.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Groups/roles claim: a literal list or a comma-separated string.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum GroupsClaim {
    List(Vec<String>),
    Csv(String),
}

impl GroupsClaim {
    fn into_groups(self) -> Vec<String> {
        match self {
            Self::List(groups) => groups,
            Self::Csv(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|group| !group.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct IdClaims {
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub groups: Option<GroupsClaim>,
    #[serde(default)]
    pub roles: Option<GroupsClaim>,
}

pub struct OidcClient {
    config: OidcConfig,
    endpoints: Endpoints,
    http: reqwest::Client,
}

impl OidcClient {
    #[must_use]
    pub fn new(config: OidcConfig, endpoints: Endpoints, http: reqwest::Client) -> Self {
        Self {
            config,
            endpoints,
            http,
        }
    }

    /// Fetch the provider metadata and build a client.
    ///
    /// # Errors
    /// Returns an error when the discovery document cannot be fetched or
    /// parsed.
    pub async fn discover(config: OidcConfig, http: reqwest::Client) -> Result<Self> {
        let well_known = format!(
            "{}/.well-known/openid-configuration",
            config.issuer.trim_end_matches('/')
        );
        let endpoints: Endpoints = http
            .get(&well_known)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {well_known}"))?
            .error_for_status()
            .context("Discovery document request failed")?
            .json()
            .await
            .context("Invalid discovery document")?;
        Ok(Self::new(config, endpoints, http))
    }

    #[must_use]
    pub const fn config(&self) -> &OidcConfig {
        &self.config
    }

    #[must_use]
    pub fn end_session_endpoint(&self) -> Option<&str> {
        self.endpoints.end_session_endpoint.as_deref()
    }

    /// Phase 1: mint `state`, `nonce`, and a PKCE verifier, and build the
    /// authorization redirect. The handshake must be stored in the caller's
    /// session before redirecting.
    ///
    /// # Errors
    /// Returns an error when the authorization endpoint is not a valid URL.
    pub fn begin_login(&self) -> Result<(Url, Handshake)> {
        let handshake = Handshake {
            state: random_token(),
            nonce: random_token(),
            pkce_verifier: random_token(),
        };

        let mut url = Url::parse(&self.endpoints.authorization_endpoint)
            .context("Invalid authorization endpoint")?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", &handshake.state)
            .append_pair("nonce", &handshake.nonce)
            .append_pair("code_challenge", &pkce_challenge(&handshake.pkce_verifier))
            .append_pair("code_challenge_method", "S256");

        Ok((url, handshake))
    }

    /// Phase 2: validate the callback. Fail-closed; the caller has already
    /// consumed the stored handshake, so any error leaves no reusable state.
    ///
    /// # Errors
    /// Any validation step failing aborts the login with the step's error.
    pub async fn complete_login(
        &self,
        returned_state: &str,
        code: &str,
        handshake: &Handshake,
        now: DateTime<Utc>,
    ) -> Result<FederatedSession, OidcError> {
        // Anti-CSRF: checked before any token exchange side effect.
        if returned_state != handshake.state {
            return Err(OidcError::StateMismatch);
        }

        let id_token = self.exchange_code(code, &handshake.pkce_verifier).await?;
        let claims = self.decode_claims(&id_token)?;

        validate_claims(claims, &self.config, &handshake.nonce, now)
    }

    async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> Result<String, OidcError> {
        let response = self
            .http
            .post(&self.endpoints.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.config.redirect_uri),
                ("client_id", &self.config.client_id),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("code_verifier", pkce_verifier),
            ])
            .send()
            .await
            .map_err(OidcError::Exchange)?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::ExchangeStatus(status.as_u16()));
        }

        let token: TokenResponse = response.json().await.map_err(OidcError::Exchange)?;
        token.id_token.ok_or(OidcError::MissingClaims)
    }

    fn decode_claims(&self, id_token: &str) -> Result<IdClaims, OidcError> {
        match &self.config.public_key {
            Some(pem) => verified_claims(id_token, pem),
            None => unverified_claims(id_token),
        }
    }
}

/// Claim validation sequence shared by the verified and unverified paths.
/// Ordered per the handshake contract; the first failure wins.
pub(crate) fn validate_claims(
    claims: IdClaims,
    config: &OidcConfig,
    expected_nonce: &str,
    now: DateTime<Utc>,
) -> Result<FederatedSession, OidcError> {
    // Anti-replay.
    if claims.nonce.as_deref() != Some(expected_nonce) {
        return Err(OidcError::NonceMismatch);
    }

    match &claims.aud {
        Some(aud) if aud.contains(&config.client_id) => {}
        _ => return Err(OidcError::Audience),
    }

    if let Some(iss) = &claims.iss {
        if normalize_issuer(iss) != normalize_issuer(&config.issuer) {
            return Err(OidcError::Issuer);
        }
    }

    let Some(exp) = claims.exp else {
        return Err(OidcError::Expired);
    };
    if exp + LEEWAY_SECONDS < now.timestamp() {
        return Err(OidcError::Expired);
    }
    if let Some(nbf) = claims.nbf {
        if nbf - LEEWAY_SECONDS > now.timestamp() {
            return Err(OidcError::NotYetValid);
        }
    }

    let user = claims
        .email
        .or(claims.preferred_username)
        .or(claims.name)
        .unwrap_or_else(|| "oidc-user".to_string());
    let groups = claims
        .groups
        .or(claims.roles)
        .map(GroupsClaim::into_groups)
        .unwrap_or_default();

    let restricted = config.admin_group.is_some() || config.user_group.is_some();
    let admin = if restricted {
        if groups.is_empty() {
            return Err(OidcError::NoGroups);
        }
        let user_allowed = config
            .user_group
            .as_ref()
            .is_none_or(|group| groups.contains(group));
        if !user_allowed {
            return Err(OidcError::GroupDenied);
        }
        config
            .admin_group
            .as_ref()
            .is_some_and(|group| groups.contains(group))
    } else {
        false
    };

    Ok(FederatedSession {
        user,
        groups,
        exp,
        admin,
    })
}

fn verified_claims(id_token: &str, pem: &str) -> Result<IdClaims, OidcError> {
    let key = jsonwebtoken::DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(OidcError::Signature)?;
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
    // exp/aud/iss are validated by the shared sequence, with our own leeway
    // and normalization rules.
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<IdClaims>(id_token, &key, &validation)
        .map_err(OidcError::Signature)?;
    Ok(data.claims)
}

fn unverified_claims(id_token: &str) -> Result<IdClaims, OidcError> {
    let mut segments = id_token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(OidcError::MissingClaims),
    };
    let decoded = Base64UrlUnpadded::decode_vec(payload).map_err(|_| OidcError::MissingClaims)?;
    serde_json::from_slice(&decoded).map_err(|_| OidcError::MissingClaims)
}

/// Issuer comparison ignores the scheme and trailing slashes.
fn normalize_issuer(issuer: &str) -> &str {
    issuer
        .strip_prefix("https://")
        .or_else(|| issuer.strip_prefix("http://"))
        .unwrap_or(issuer)
        .trim_end_matches('/')
}

fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

/// Random 32-hex-char token for state/nonce/verifier values.
fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
