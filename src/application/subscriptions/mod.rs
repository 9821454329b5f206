//! Subscription Manager - subscription lifecycle and the active-product index.
//!
//! Subscriptions are stored per user (`subscription:<user>:<id>`) with a
//! `subscription_ref:<id>` entry pointing back at the owner. Every mutation
//! holds the `subscription:<id>` lock; the per-user index of active products
//! is refreshed after each committed change.

mod apply;
mod cancel;
mod index;

pub use cancel::CancelSubscriptionResult;
pub use index::IndexRebuildReport;

use std::sync::Arc;

use self::index::ActiveIndex;
use super::callbacks::CallbackRegistry;
use super::locks::EntityLocks;
use super::records::{keys, Records};
use crate::domain::billing::Subscription;
use crate::domain::foundation::{BillingError, ProductId, SubscriptionId, UserId};
use crate::ports::GatewayClient;

/// Owns subscription records and answers access checks.
pub struct SubscriptionManager {
    records: Records,
    locks: EntityLocks,
    gateway: Arc<dyn GatewayClient>,
    callbacks: CallbackRegistry,
    index: ActiveIndex,
}

impl SubscriptionManager {
    pub fn new(
        records: Records,
        locks: EntityLocks,
        gateway: Arc<dyn GatewayClient>,
        callbacks: CallbackRegistry,
    ) -> Self {
        Self {
            records,
            locks,
            gateway,
            callbacks,
            index: ActiveIndex::default(),
        }
    }

    /// Products the user currently has access to, in id order.
    pub fn get_active_subscriptions(&self, user_id: &UserId) -> Vec<ProductId> {
        self.index.products(user_id)
    }

    pub fn is_subscribed(&self, user_id: &UserId, product_ref: &ProductId) -> bool {
        self.index.contains(user_id, product_ref)
    }

    /// Returns a subscription by id.
    pub async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Subscription, BillingError> {
        self.find_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))
    }

    pub(crate) async fn find_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<Subscription>, BillingError> {
        let owner = self
            .records
            .load::<UserId>(&keys::subscription_ref(subscription_id))
            .await?;
        match owner {
            Some(user_id) => Ok(self
                .records
                .load(&keys::subscription(&user_id, subscription_id))
                .await?),
            None => Ok(None),
        }
    }

    /// Every stored subscription of a user, in id order.
    pub async fn list_user_subscriptions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Subscription>, BillingError> {
        let stored = self
            .records
            .load_all::<Subscription>(&keys::subscription_user_prefix(user_id))
            .await?;
        Ok(stored.into_iter().map(|(_, sub)| sub).collect())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), BillingError> {
        self.records
            .save(
                &keys::subscription(&subscription.user_id, &subscription.id),
                subscription,
            )
            .await?;
        self.records
            .save(
                &keys::subscription_ref(&subscription.id),
                &subscription.user_id,
            )
            .await?;
        Ok(())
    }

    /// Deletes every subscription of `user_id`; returns how many were removed.
    pub async fn delete_user_subscriptions(&self, user_id: &UserId) -> Result<usize, BillingError> {
        let stored = self
            .records
            .load_all::<Subscription>(&keys::subscription_user_prefix(user_id))
            .await?;

        let mut deleted = 0;
        for (key, subscription) in stored {
            let _guard = self
                .locks
                .acquire(super::locks::subscription_lock(&subscription.id))
                .await;
            self.records
                .delete(&keys::subscription_ref(&subscription.id))
                .await?;
            self.records.delete(&key).await?;
            deleted += 1;
        }
        self.refresh_index(user_id).await?;
        tracing::info!(user_id = %user_id, deleted, "Deleted user subscriptions");
        Ok(deleted)
    }
}
