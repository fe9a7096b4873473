//! Options file loading and security policy knobs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const fn default_max_attempts() -> u32 {
    5
}

const fn default_block_time_minutes() -> u32 {
    5
}

const fn default_max_global_attempts_per_hour() -> u32 {
    50
}

const fn default_session_max_attempts() -> u32 {
    3
}

fn default_users_store_path() -> PathBuf {
    PathBuf::from("users.json")
}

/// Deserialized `options.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    pub ha_url: String,
    pub ha_token: String,
    pub entity_id: String,
    #[serde(default)]
    pub battery_entity: Option<String>,
    /// IANA timezone for local log timestamps.
    #[serde(default)]
    pub tz: Option<String>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub session_cookie_secure: bool,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub admin_password: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_block_time_minutes")]
    pub block_time_minutes: u32,
    #[serde(default = "default_max_global_attempts_per_hour")]
    pub max_global_attempts_per_hour: u32,
    #[serde(default = "default_session_max_attempts")]
    pub session_max_attempts: u32,
    /// Baseline username -> PIN map, read-only at runtime.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    #[serde(default = "default_users_store_path")]
    pub users_store_path: PathBuf,
    #[serde(default)]
    pub oidc: Option<OidcOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub admin_group: Option<String>,
    #[serde(default)]
    pub user_group: Option<String>,
    #[serde(default)]
    pub require_pin_for_oidc: bool,
    /// Optional PEM public key; when present the ID token signature is verified.
    #[serde(default)]
    pub public_key: Option<String>,
}

impl Options {
    /// Load and parse the options file.
    ///
    /// # Errors
    /// Returns an error when the file is missing or not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Options file not found: {}", path.display()))?;
        let options: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid options file: {}", path.display()))?;
        Ok(options)
    }

    /// Battery sensor entity, derived from the door entity when not configured.
    #[must_use]
    pub fn battery_entity(&self) -> String {
        self.battery_entity.clone().unwrap_or_else(|| {
            let device = self
                .entity_id
                .split_once('.')
                .map_or(self.entity_id.as_str(), |(_, device)| device);
            format!("sensor.{device}_battery")
        })
    }
}
