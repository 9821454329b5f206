//! Typed JSON records over the entity store, and the key layout.

use futures::{future, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::ports::{EntityStore, StoreError};

/// Key layout of every record the engine persists.
pub mod keys {
    use std::fmt::Display;

    pub const PRODUCT_PREFIX: &str = "product:";
    pub const SUBSCRIPTION_PREFIX: &str = "subscription:";
    pub const WEBHOOK_EVENT_PREFIX: &str = "webhook_event:";

    pub fn product(id: impl Display) -> String {
        format!("{}{}", PRODUCT_PREFIX, id)
    }

    pub fn payment(id: impl Display) -> String {
        format!("payment:{}", id)
    }

    /// Transaction id -> payment id.
    pub fn payment_txn(gateway_transaction_id: &str) -> String {
        format!("payment_txn:{}", gateway_transaction_id)
    }

    /// One entry per payment of a user; the value is the payment id.
    pub fn payment_user(user_id: impl Display, payment_id: impl Display) -> String {
        format!("payment_user:{}:{}", user_id, payment_id)
    }

    pub fn payment_user_prefix(user_id: impl Display) -> String {
        format!("payment_user:{}:", user_id)
    }

    pub fn subscription(user_id: impl Display, subscription_id: impl Display) -> String {
        format!("{}{}:{}", SUBSCRIPTION_PREFIX, user_id, subscription_id)
    }

    pub fn subscription_user_prefix(user_id: impl Display) -> String {
        format!("{}{}:", SUBSCRIPTION_PREFIX, user_id)
    }

    /// Subscription id -> owning user id.
    pub fn subscription_ref(subscription_id: impl Display) -> String {
        format!("subscription_ref:{}", subscription_id)
    }
}

/// JSON-encoded access to the entity store.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn EntityStore>,
}

impl Records {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.put(key, bytes).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key).await
    }

    /// Decodes every record under `prefix`, in key order.
    pub async fn load_all<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, StoreError> {
        self.store
            .scan(prefix)
            .and_then(|(key, bytes)| {
                future::ready(decode(&key, &bytes).map(|value| (key, value)))
            })
            .try_collect()
            .await
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
