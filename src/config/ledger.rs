//! Ledger configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Ledger query limits
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Page size when a query gives no limit
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,

    /// Upper bound applied to any requested limit
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: usize,
}

impl LedgerConfig {
    /// Validate ledger configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(ValidationError::InvalidPageLimit);
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
        }
    }
}

fn default_page_limit() -> usize {
    50
}

fn default_max_page_limit() -> usize {
    500
}
