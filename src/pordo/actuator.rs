//! Home Assistant actuator client.
//!
//! A single outbound call per grant; the entity id namespace selects the
//! service to invoke (unlock vs. turn-on).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::time::Duration;
use tracing::{error, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Home Assistant API error: {0}")]
    Http(u16),
    #[error("Failed to contact Home Assistant")]
    Network(#[source] reqwest::Error),
}

#[async_trait]
pub trait Actuator: Send + Sync {
    /// Command the actuator to unlock/open its entity.
    async fn trigger_open(&self) -> Result<(), ActuatorError>;
}

pub struct HomeAssistant {
    base_url: String,
    token: SecretString,
    entity_id: String,
    battery_entity: String,
    client: reqwest::Client,
}

impl HomeAssistant {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        token: SecretString,
        entity_id: String,
        battery_entity: String,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            entity_id,
            battery_entity,
            client,
        })
    }

    /// Service endpoint, selected by the entity namespace.
    fn service_url(&self) -> String {
        let service = if self.entity_id.starts_with("lock.") {
            "lock/unlock"
        } else if self.entity_id.starts_with("input_boolean.") {
            "input_boolean/turn_on"
        } else {
            "switch/turn_on"
        };
        format!("{}/api/services/{service}", self.base_url)
    }

    /// Battery level from the configured sensor, when it reports a sane
    /// percentage. Any upstream oddity becomes `None`.
    pub async fn battery_level(&self) -> Option<u8> {
        let url = format!("{}/api/states/{}", self.base_url, self.battery_entity);
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|err| error!("Failed to fetch battery state: {err}"))
            .ok()?;

        if !response.status().is_success() {
            error!("Failed to fetch battery state: {}", response.status());
            return None;
        }

        let state: serde_json::Value = response.json().await.ok()?;
        let level = state.get("state")?.as_str()?.parse::<f64>().ok()?;
        if (0.0..=100.0).contains(&level) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Some(level as u8)
        } else {
            warn!("Battery level out of range: {level}");
            None
        }
    }
}

#[async_trait]
impl Actuator for HomeAssistant {
    async fn trigger_open(&self) -> Result<(), ActuatorError> {
        let response = self
            .client
            .post(self.service_url())
            .bearer_auth(self.token.expose_secret())
            .json(&json!({ "entity_id": self.entity_id }))
            .send()
            .await
            .map_err(ActuatorError::Network)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ActuatorError::Http(status.as_u16()))
        }
    }
}
