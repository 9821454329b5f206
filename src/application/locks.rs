//! Per-entity exclusive sections.
//!
//! Every mutation of a payment, subscription or webhook event runs while
//! holding the mutex for its key. Mutexes live in a `DashMap` and are
//! removed when the last holder releases, so the map only grows with the
//! number of entities being mutated right now.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Keyed async mutexes.
#[derive(Clone, Default)]
pub struct EntityLocks {
    locks: Arc<LockMap>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn acquire(&self, key: impl Into<String>) -> EntityGuard {
        let key = key.into();
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        EntityGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one key; released on drop.
pub struct EntityGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl EntityGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits it.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Lock key for a payment, by gateway transaction.
pub fn payment_lock(gateway_transaction_id: &str) -> String {
    format!("payment_txn:{}", gateway_transaction_id)
}

/// Lock key for a subscription.
pub fn subscription_lock(subscription_id: &impl std::fmt::Display) -> String {
    format!("subscription:{}", subscription_id)
}

/// Lock key serializing index refreshes for one user.
pub fn index_lock(user_id: &impl std::fmt::Display) -> String {
    format!("active_index:{}", user_id)
}
