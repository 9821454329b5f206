//! Entity store port.
//!
//! A generic persistent key/value store. Keys are namespaced by entity
//! kind (`payment:<id>`, `subscription:<user_id>:<id>`, ...) so a prefix
//! scan lists one kind, or one user's records of that kind.
//!
//! The store carries no business logic; read-modify-write atomicity for an
//! entity comes from the caller's per-entity lock.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::foundation::BillingError;

/// Errors from entity store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store failed.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error for '{key}': {reason}")]
    Serialization { key: String, reason: String },
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        BillingError::Storage(err.to_string())
    }
}

/// A `(key, value)` pair yielded by a scan.
pub type Entry = (String, Vec<u8>);

/// Port for the persistent key/value store.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Streams every entry whose key starts with `prefix`, in key order.
    fn scan<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<Entry, StoreError>>;
}
