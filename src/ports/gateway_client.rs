//! Gateway client port - outbound calls to the remote billing API.
//!
//! Every call returns a typed result or a [`GatewayError`]. Implementations
//! retry transient failures only for reads and for writes that carry an
//! idempotency key.
//!
//! # Example
//!
//! ```ignore
//! let receipt = gateway
//!     .refund(RefundRequest {
//!         gateway_transaction_id: "txn_123".into(),
//!         amount: 1100,
//!         line_item_ids: vec!["li_1".into()],
//!         reason: Some("requested_by_customer".into()),
//!         idempotency_key: None,
//!     })
//!     .await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::billing::{Frequency, PaymentStatus, SubscriptionStatus};
use crate::domain::foundation::{BillingError, SubscriptionId, UserId};

/// Port for the remote billing gateway.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Charge a customer for a set of products.
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, GatewayError>;

    /// Refund (part of) a settled transaction.
    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError>;

    /// Cancel a subscription now or at period end.
    async fn cancel(&self, request: CancelRequest) -> Result<CancelReceipt, GatewayError>;

    /// Undo a pending period-end cancellation.
    async fn resume_subscription(
        &self,
        subscription_id: &SubscriptionId,
        idempotency_key: Option<String>,
    ) -> Result<RemoteSubscription, GatewayError>;

    /// Fetch a subscription; `None` if the gateway does not know it.
    async fn fetch_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<RemoteSubscription>, GatewayError>;

    /// Fetch a transaction; `None` if the gateway does not know it.
    async fn fetch_payment(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<RemotePayment>, GatewayError>;

    /// Create a product in the remote catalog.
    async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<RemoteProduct, GatewayError>;

    /// List the remote catalog.
    async fn list_products(&self) -> Result<Vec<RemoteProduct>, GatewayError>;
}

/// One priced line of a charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeLine {
    /// Gateway reference of the product being charged.
    pub product_gateway_ref: String,
    pub quantity: u32,
    /// Line total in minor units.
    pub amount: i64,
}

/// Request to charge a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub user_id: UserId,
    pub customer_ref: String,
    pub currency: String,
    /// Total in minor units.
    pub amount: i64,
    pub lines: Vec<ChargeLine>,
    /// Makes the charge safe to retry.
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

/// Result of a successful charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub gateway_transaction_id: String,
    pub status: PaymentStatus,
    /// Unix seconds.
    pub created: i64,
}

/// Request to refund a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub gateway_transaction_id: String,
    /// Amount in minor units.
    pub amount: i64,
    pub line_item_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

/// Result of a successful refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub amount: i64,
}

/// Request to cancel a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub subscription_id: SubscriptionId,
    /// Cancel at the end of the current period instead of now.
    pub at_period_end: bool,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

/// Result of a successful cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReceipt {
    pub subscription_id: SubscriptionId,
    pub status: SubscriptionStatus,
}

/// Subscription as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: SubscriptionId,
    pub customer_ref: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub product_refs: Vec<String>,
}

/// Transaction as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePayment {
    pub gateway_transaction_id: String,
    pub status: PaymentStatus,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub refunded_amount: i64,
}

/// Request to create a product in the remote catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProductRequest {
    /// Local product id, echoed back as metadata.
    pub product_id: String,
    pub name: String,
    pub price: i64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

/// Product as the gateway's catalog describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub gateway_ref: String,
    pub name: String,
    pub price: i64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

/// Errors from gateway operations.
#[derive(Debug, Clone)]
pub struct GatewayError {
    /// Error code for categorization.
    pub code: GatewayErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Delay requested by the gateway before retrying.
    pub retry_after: Option<Duration>,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a network error (connect failure, timeout, 5xx).
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::NetworkError, message)
    }

    /// Create a rejection (4xx other than auth and rate limit).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::GatewayRejected, message)
    }

    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(GatewayErrorCode::RateLimited, message)
        }
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::AuthError, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for BillingError {
    fn from(err: GatewayError) -> Self {
        match err.code {
            GatewayErrorCode::NetworkError => BillingError::NetworkError(err.message),
            GatewayErrorCode::GatewayRejected => BillingError::GatewayRejected(err.message),
            GatewayErrorCode::RateLimited => BillingError::RateLimited(err.message),
            GatewayErrorCode::AuthError => BillingError::AuthError(err.message),
        }
    }
}

/// Gateway error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    /// Connectivity issue, timeout or gateway-side 5xx.
    NetworkError,

    /// The gateway refused the request as invalid.
    GatewayRejected,

    /// Too many requests.
    RateLimited,

    /// API key missing or not authorized.
    AuthError,
}

impl GatewayErrorCode {
    /// Check if this error type is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayErrorCode::NetworkError | GatewayErrorCode::RateLimited
        )
    }
}

impl std::fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayErrorCode::NetworkError => "network_error",
            GatewayErrorCode::GatewayRejected => "gateway_rejected",
            GatewayErrorCode::RateLimited => "rate_limited",
            GatewayErrorCode::AuthError => "auth_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::ErrorKind;

    #[test]
    fn gateway_client_is_object_safe() {
        fn _accepts_dyn(_client: &dyn GatewayClient) {}
    }

    #[test]
    fn gateway_error_retryable() {
        assert!(GatewayErrorCode::NetworkError.is_retryable());
        assert!(GatewayErrorCode::RateLimited.is_retryable());

        assert!(!GatewayErrorCode::GatewayRejected.is_retryable());
        assert!(!GatewayErrorCode::AuthError.is_retryable());
    }

    #[test]
    fn gateway_error_display() {
        let err = GatewayError::rejected("amount exceeds charge");
        assert_eq!(err.to_string(), "gateway_rejected: amount exceeds charge");
    }

    #[test]
    fn rate_limited_keeps_retry_after() {
        let err = GatewayError::rate_limited("slow down", Some(Duration::from_secs(2)));
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));
        assert!(err.is_retryable());
    }

    #[test]
    fn gateway_error_converts_to_billing_error_kind() {
        let cases = [
            (GatewayError::network("timeout"), ErrorKind::NetworkError),
            (GatewayError::rejected("bad"), ErrorKind::GatewayRejected),
            (GatewayError::rate_limited("slow", None), ErrorKind::RateLimited),
            (GatewayError::auth("key"), ErrorKind::AuthError),
        ];
        for (err, kind) in cases {
            let billing: BillingError = err.into();
            assert_eq!(billing.kind(), kind);
        }
    }

    #[test]
    fn idempotency_key_is_not_serialized_into_body() {
        let req = CancelRequest {
            subscription_id: SubscriptionId::new("sub_1").unwrap(),
            at_period_end: true,
            idempotency_key: Some("cancel:sub_1".to_string()),
        };
        let body = serde_json::to_value(&req).unwrap();
        assert!(body.get("idempotency_key").is_none());
    }
}
