//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid gateway base URL")]
    InvalidGatewayUrl,

    #[error("Gateway base URL must use HTTPS in production")]
    GatewayUrlMustBeHttps,

    #[error("Invalid gateway timeout")]
    InvalidTimeout,

    #[error("Gateway max_attempts must be between 1 and 10")]
    InvalidMaxAttempts,

    #[error("Gateway initial backoff exceeds max backoff")]
    InvalidBackoff,

    #[error("Webhook tolerance must be between 1 and 3600 seconds")]
    InvalidTolerance,

    #[error("Webhook event retention must be at least one day")]
    InvalidRetention,

    #[error("Ledger default page limit must be between 1 and max_page_limit")]
    InvalidPageLimit,

    #[error("Unknown log format: {0}")]
    InvalidLogFormat(String),
}
