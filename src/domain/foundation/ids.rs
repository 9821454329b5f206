//! Strongly-typed identifier value objects.
//!
//! Gateway-owned entities carry the identifiers the gateway assigned them,
//! so every id here wraps a non-empty string rather than a UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Separates key components in the entity store; ids may not contain it.
pub const KEY_SEPARATOR: char = ':';

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates the id, returning error if empty or containing
            /// [`KEY_SEPARATOR`].
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::empty_field($field));
                }
                if id.contains(KEY_SEPARATOR) {
                    return Err(ValidationError::invalid_format(
                        $field,
                        format!("'{}' must not contain '{}'", id, KEY_SEPARATOR),
                    ));
                }
                Ok(Self(id))
            }

            /// Returns the inner string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(
    /// Identifier of the user owning payments and subscriptions.
    UserId,
    "user_id"
);

string_id!(
    /// Identifier of a catalog product or plan.
    ProductId,
    "product_id"
);

string_id!(
    /// Local identifier of a payment record.
    PaymentId,
    "payment_id"
);

string_id!(
    /// Identifier of a subscription, shared with the gateway.
    SubscriptionId,
    "subscription_id"
);

impl PaymentId {
    /// Generates a fresh local payment id.
    pub fn generate() -> Self {
        Self(format!("pay_{}", Uuid::new_v4().simple()))
    }
}
