//! Rejections returned to the gateway's webhook delivery.

use http::StatusCode;
use thiserror::Error;

/// Reasons a webhook delivery is not acknowledged.
///
/// Everything else, including duplicates, stale events and unknown types,
/// is acknowledged.
#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    /// Signature header missing, malformed, expired or not matching.
    #[error("Webhook signature invalid")]
    SignatureInvalid,

    /// Authenticated payload that does not match a known event shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Entity store failed before the event was recorded.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl WebhookError {
    /// Returns true if the gateway should redeliver this webhook.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Storage(_))
    }

    /// Maps the error to the HTTP status sent back to the gateway.
    ///
    /// Signature and shape failures share one status and body.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::SignatureInvalid | WebhookError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body safe to return to the sender.
    pub fn public_message(&self) -> &'static str {
        match self {
            WebhookError::SignatureInvalid | WebhookError::MalformedPayload(_) => {
                "webhook rejected"
            }
            WebhookError::Storage(_) => "temporarily unavailable",
        }
    }
}
