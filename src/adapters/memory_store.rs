//! In-memory entity store.
//!
//! Ordered map behind a tokio `RwLock`; prefix scans walk the key range.
//! Used by tests and by the one-shot reconcile binary. Writes can be made
//! to fail on demand to exercise storage-failure paths.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::ports::{EntityStore, Entry, StoreError};

/// Entity store holding everything in process memory.
#[derive(Default)]
pub struct InMemoryEntityStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put`/`delete` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Keys starting with `prefix`, in order.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn check_writable(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("write to '{}' refused", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.check_writable(key)?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    fn scan<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<Entry, StoreError>> {
        let snapshot = async move {
            let entries = self.entries.read().await;
            let matched: Vec<Result<Entry, StoreError>> = entries
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| Ok((key.clone(), value.clone())))
                .collect();
            stream::iter(matched)
        };
        stream::once(snapshot).flatten().boxed()
    }
}
