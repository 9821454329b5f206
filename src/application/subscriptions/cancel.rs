//! API-driven cancellation and the resubscribe recovery path.

use serde::Serialize;

use super::apply::callback_kind;
use super::SubscriptionManager;
use crate::application::locks::subscription_lock;
use crate::domain::billing::{CancelMode, Subscription, SubscriptionStatus};
use crate::domain::foundation::{
    BillingError, ProductId, SubscriptionId, Timestamp, UserId, ValidationError,
};
use crate::ports::{CallbackEvent, CancelRequest};

/// What `cancel_subscription` did per target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CancelSubscriptionResult {
    /// Subscriptions cancelled by this call.
    pub cancelled: Vec<SubscriptionId>,
    /// Subscriptions that were already in the requested end state.
    pub already_cancelled: Vec<SubscriptionId>,
    /// Requested products with no subscription (only when not failing on them).
    pub not_subscribed: Vec<ProductId>,
}

impl SubscriptionManager {
    /// Cancels the subscriptions owning `product_refs`.
    ///
    /// Every product is resolved before the gateway is called, so a missing
    /// subscription fails the whole call without side effects when
    /// `throw_if_missing` is set.
    pub async fn cancel_subscription(
        &self,
        user_id: &UserId,
        product_refs: &[ProductId],
        immediate: bool,
        throw_if_missing: bool,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        if product_refs.is_empty() {
            return Err(ValidationError::empty_field("product_refs").into());
        }
        let mode = CancelMode::from_immediate(immediate);

        // 1. Resolve owning subscriptions.
        let subscriptions = self.list_user_subscriptions(user_id).await?;
        let mut result = CancelSubscriptionResult::default();
        let mut targets: Vec<SubscriptionId> = Vec::new();
        for product_ref in product_refs {
            match owning_subscription(&subscriptions, product_ref) {
                Some(sub) => {
                    if !targets.contains(&sub.id) {
                        targets.push(sub.id.clone());
                    }
                }
                None if throw_if_missing => {
                    return Err(BillingError::NotSubscribed {
                        user_id: user_id.to_string(),
                        product_ref: product_ref.to_string(),
                    });
                }
                None => result.not_subscribed.push(product_ref.clone()),
            }
        }

        // 2. Cancel each one under its lock.
        let mut events = Vec::new();
        let mut failure = None;
        for subscription_id in &targets {
            match self.cancel_one(subscription_id, mode).await {
                Ok(Some(event)) => {
                    events.push(event);
                    result.cancelled.push(subscription_id.clone());
                }
                Ok(None) => result.already_cancelled.push(subscription_id.clone()),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        // 3. Publish whatever was committed.
        self.refresh_index(user_id).await?;
        self.callbacks.notify(events).await;

        if let Some(err) = failure {
            return Err(err);
        }
        if result.cancelled.is_empty() {
            if let Some(first) = result.already_cancelled.first() {
                return Err(BillingError::AlreadyCancelled {
                    subscription_id: first.to_string(),
                });
            }
        }
        Ok(result)
    }

    /// Returns the callback owed, or `None` if nothing had to change.
    async fn cancel_one(
        &self,
        subscription_id: &SubscriptionId,
        mode: CancelMode,
    ) -> Result<Option<CallbackEvent>, BillingError> {
        let _guard = self.locks.acquire(subscription_lock(subscription_id)).await;
        // Re-read under the lock: a webhook may have got here first.
        let Some(mut subscription) = self.find_subscription(subscription_id).await? else {
            return Err(BillingError::not_found("subscription", subscription_id));
        };

        let target = mode.target_status();
        if subscription.status == SubscriptionStatus::Cancelled || subscription.status == target {
            tracing::info!(
                subscription_id = %subscription_id,
                status = ?subscription.status,
                "Subscription already cancelled, skipping gateway"
            );
            return Ok(None);
        }

        let request = CancelRequest {
            subscription_id: subscription_id.clone(),
            at_period_end: mode == CancelMode::AtPeriodEnd,
            idempotency_key: Some(format!("cancel:{}:{}", subscription_id, mode.as_str())),
        };
        let receipt = self.gateway.cancel(request).await.map_err(|err| {
            tracing::warn!(
                subscription_id = %subscription_id,
                mode = mode.as_str(),
                error = %err,
                "Gateway cancellation failed, subscription unchanged"
            );
            BillingError::from(err)
        })?;

        // The gateway may end the subscription right away regardless of mode.
        let status = if receipt.status == SubscriptionStatus::Cancelled {
            SubscriptionStatus::Cancelled
        } else {
            target
        };
        // Local clock, sub-second. Gateway events carry whole seconds, so one created
        // within the same second as this change is stale; assumes clocks agree to ~1s.
        subscription.transition(status, Timestamp::now())?;
        self.save_subscription(&subscription).await?;
        tracing::info!(
            subscription_id = %subscription_id,
            status = ?status,
            "Subscription cancelled"
        );
        Ok(Some(CallbackEvent::subscription(
            callback_kind(status),
            &subscription,
        )))
    }

    /// Undoes a pending period-end cancellation.
    pub async fn resubscribe(
        &self,
        user_id: &UserId,
        subscription_id: &SubscriptionId,
    ) -> Result<Subscription, BillingError> {
        let (subscription, event) = {
            let _guard = self.locks.acquire(subscription_lock(subscription_id)).await;
            let mut subscription = self
                .find_subscription(subscription_id)
                .await?
                .filter(|sub| &sub.user_id == user_id)
                .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;

            match subscription.status {
                SubscriptionStatus::Active => return Ok(subscription),
                SubscriptionStatus::Cancelled => {
                    return Err(BillingError::AlreadyCancelled {
                        subscription_id: subscription_id.to_string(),
                    })
                }
                SubscriptionStatus::Cancelling => {}
            }

            self.gateway
                .resume_subscription(subscription_id, Some(format!("resume:{}", subscription_id)))
                .await?;
            subscription.transition(SubscriptionStatus::Active, Timestamp::now())?;
            self.save_subscription(&subscription).await?;
            tracing::info!(subscription_id = %subscription_id, "Subscription resumed");
            let event = CallbackEvent::subscription(callback_kind(subscription.status), &subscription);
            (subscription, event)
        };

        self.refresh_index(user_id).await?;
        self.callbacks.notify(vec![event]).await;
        Ok(subscription)
    }
}

/// The subscription a cancellation of `product_ref` targets.
///
/// Access-granting subscriptions come first, newest created wins; a
/// cancelled one is returned only when nothing else covers the product.
fn owning_subscription<'a>(
    subscriptions: &'a [Subscription],
    product_ref: &ProductId,
) -> Option<&'a Subscription> {
    subscriptions
        .iter()
        .filter(|sub| sub.covers(product_ref))
        .max_by(|a, b| {
            a.status
                .grants_access()
                .cmp(&b.status.grants_access())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
}
