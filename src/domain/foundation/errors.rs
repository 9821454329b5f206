//! Error types for the domain layer.

use std::fmt;
use thiserror::Error;

/// Errors that occur during value object construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' must be between {min} and {max}, got {actual}")]
    OutOfRange {
        field: String,
        min: i64,
        max: i64,
        actual: i64,
    },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    /// Creates an out of range validation error.
    pub fn out_of_range(field: impl Into<String>, min: i64, max: i64, actual: i64) -> Self {
        ValidationError::OutOfRange {
            field: field.into(),
            min,
            max,
            actual,
        }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Error kinds exposed to callers of the public operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    NotSubscribed,
    AlreadyCancelled,
    SignatureInvalid,
    DuplicateEvent,
    StaleEvent,
    NetworkError,
    GatewayRejected,
    RateLimited,
    AuthError,
    InconsistentState,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::NotSubscribed => "NOT_SUBSCRIBED",
            ErrorKind::AlreadyCancelled => "ALREADY_CANCELLED",
            ErrorKind::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorKind::DuplicateEvent => "DUPLICATE_EVENT",
            ErrorKind::StaleEvent => "STALE_EVENT",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::GatewayRejected => "GATEWAY_REJECTED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::AuthError => "AUTH_ERROR",
            ErrorKind::InconsistentState => "INCONSISTENT_STATE",
            ErrorKind::Storage => "STORAGE_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Failure of a public billing operation.
#[derive(Debug, Clone, Error)]
pub enum BillingError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("User '{user_id}' is not subscribed to '{product_ref}'")]
    NotSubscribed { user_id: String, product_ref: String },

    #[error("Subscription '{subscription_id}' is already cancelled")]
    AlreadyCancelled { subscription_id: String },

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Event {event_type}/{event_id} was already applied")]
    DuplicateEvent { event_type: String, event_id: String },

    #[error("Event {event_type}/{event_id} is older than the applied state")]
    StaleEvent { event_type: String, event_id: String },

    #[error("Gateway unreachable: {0}")]
    NetworkError(String),

    #[error("Gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Gateway rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Gateway authentication failed: {0}")]
    AuthError(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl BillingError {
    /// Creates a not found error for an entity kind.
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a validation error for a specific field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BillingError::Validation(ValidationError::invalid_format(field, reason))
    }

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation(_) => ErrorKind::Validation,
            BillingError::NotFound { .. } => ErrorKind::NotFound,
            BillingError::NotSubscribed { .. } => ErrorKind::NotSubscribed,
            BillingError::AlreadyCancelled { .. } => ErrorKind::AlreadyCancelled,
            BillingError::SignatureInvalid => ErrorKind::SignatureInvalid,
            BillingError::DuplicateEvent { .. } => ErrorKind::DuplicateEvent,
            BillingError::StaleEvent { .. } => ErrorKind::StaleEvent,
            BillingError::NetworkError(_) => ErrorKind::NetworkError,
            BillingError::GatewayRejected(_) => ErrorKind::GatewayRejected,
            BillingError::RateLimited(_) => ErrorKind::RateLimited,
            BillingError::AuthError(_) => ErrorKind::AuthError,
            BillingError::InconsistentState(_) => ErrorKind::InconsistentState,
            BillingError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Returns true if a caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::NetworkError(_) | BillingError::RateLimited(_) | BillingError::Storage(_)
        )
    }

    /// Returns true for the informational no-op kinds.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            BillingError::DuplicateEvent { .. } | BillingError::StaleEvent { .. }
        )
    }
}
