//! Webhook configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Inbound webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// HMAC signing secret shared with the gateway
    pub secret: SecretString,

    /// Maximum signature age in seconds
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,

    /// Days to keep dedup records before purging
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: i64,
}

impl WebhookConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            tolerance_secs: default_tolerance_secs(),
            event_retention_days: default_event_retention_days(),
        }
    }

    /// Validate webhook configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("BILLING__WEBHOOK__SECRET"));
        }
        if !(1..=3600).contains(&self.tolerance_secs) {
            return Err(ValidationError::InvalidTolerance);
        }
        if self.event_retention_days < 1 {
            return Err(ValidationError::InvalidRetention);
        }
        Ok(())
    }
}

fn default_tolerance_secs() -> i64 {
    300
}

fn default_event_retention_days() -> i64 {
    30
}
