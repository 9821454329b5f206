//! Applying gateway-reported subscription state.

use super::SubscriptionManager;
use crate::application::change::{Change, ChangeKind};
use crate::application::locks::subscription_lock;
use crate::domain::billing::{Subscription, SubscriptionNotice, SubscriptionStatus};
use crate::domain::foundation::{BillingError, SubscriptionId, Timestamp};
use crate::ports::{CallbackEvent, CallbackKind};

pub(super) fn callback_kind(status: SubscriptionStatus) -> CallbackKind {
    match status {
        SubscriptionStatus::Active => CallbackKind::SubscriptionActivated,
        SubscriptionStatus::Cancelling => CallbackKind::SubscriptionCancelling,
        SubscriptionStatus::Cancelled => CallbackKind::SubscriptionCancelled,
    }
}

impl SubscriptionManager {
    /// Applies a subscription state reported at `at`.
    ///
    /// Changes older than the last applied one are discarded; transitions
    /// the lifecycle does not allow are logged and left alone.
    pub(crate) async fn apply_subscription_notice(
        &self,
        notice: SubscriptionNotice,
        status: SubscriptionStatus,
        at: Timestamp,
    ) -> Result<Change, BillingError> {
        let user_id = notice.user_id.clone();
        let change = {
            let _guard = self.locks.acquire(subscription_lock(&notice.id)).await;
            self.apply_locked(notice, status, at).await?
        };
        if matches!(change.kind, ChangeKind::Applied | ChangeKind::Unchanged) {
            self.refresh_index(&user_id).await?;
        }
        Ok(change)
    }

    async fn apply_locked(
        &self,
        notice: SubscriptionNotice,
        status: SubscriptionStatus,
        at: Timestamp,
    ) -> Result<Change, BillingError> {
        let Some(mut subscription) = self.find_subscription(&notice.id).await? else {
            let subscription = Subscription::new(
                notice.id,
                notice.user_id,
                notice.customer_ref,
                status,
                notice.product_refs,
                at,
            )?;
            self.save_subscription(&subscription).await?;
            tracing::info!(
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                status = ?subscription.status,
                "Subscription created"
            );
            let event = CallbackEvent::subscription(callback_kind(status), &subscription);
            return Ok(Change::applied(vec![event]));
        };

        if subscription.user_id != notice.user_id {
            tracing::error!(
                kind = "INCONSISTENT_STATE",
                subscription_id = %subscription.id,
                stored_user = %subscription.user_id,
                incoming_user = %notice.user_id,
                "Subscription reported for a different user, ignoring"
            );
            return Ok(Change::of(ChangeKind::Inconsistent));
        }

        if subscription.is_stale(&at) {
            tracing::debug!(
                subscription_id = %subscription.id,
                at = ?at,
                applied = ?subscription.last_event_at,
                "Stale subscription change discarded"
            );
            return Ok(Change::of(ChangeKind::Stale));
        }

        let from = subscription.status;
        match subscription.transition(status, at) {
            Ok(changed) => {
                subscription.refresh_details(notice.customer_ref, notice.product_refs);
                self.save_subscription(&subscription).await?;
                if !changed {
                    return Ok(Change::of(ChangeKind::Unchanged));
                }
                tracing::info!(
                    subscription_id = %subscription.id,
                    from = ?from,
                    to = ?status,
                    "Subscription transitioned"
                );
                let event = CallbackEvent::subscription(callback_kind(status), &subscription);
                Ok(Change::applied(vec![event]))
            }
            Err(err) => {
                tracing::error!(
                    kind = "INCONSISTENT_STATE",
                    subscription_id = %subscription.id,
                    from = ?from,
                    to = ?status,
                    error = %err,
                    "Subscription transition not allowed, ignoring"
                );
                Ok(Change::of(ChangeKind::Inconsistent))
            }
        }
    }

    /// Pulls a subscription's status from the gateway and applies it.
    ///
    /// Recovers from webhooks the gateway never delivered.
    pub async fn sync_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<ChangeKind, BillingError> {
        let local = self.get_subscription(subscription_id).await?;
        let Some(remote) = self.gateway.fetch_subscription(subscription_id).await? else {
            tracing::warn!(
                subscription_id = %subscription_id,
                "Subscription unknown to the gateway"
            );
            return Ok(ChangeKind::Unchanged);
        };

        let notice = SubscriptionNotice {
            id: local.id,
            user_id: local.user_id,
            customer_ref: remote.customer_ref,
            status: Some(remote.status),
            // Remote product refs are gateway references; keep the local ones.
            product_refs: Vec::new(),
        };
        let change = self
            .apply_subscription_notice(notice, remote.status, Timestamp::now())
            .await?;
        self.callbacks.notify(change.callbacks).await;
        Ok(change.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::subscriptions::tests::{
        manager, notice, product, seed, sub_id, ts, user, Harness,
    };
    use crate::ports::RemoteSubscription;

    #[tokio::test]
    async fn first_notice_creates_subscription() {
        let Harness { manager, .. } = manager();

        let change = manager
            .apply_subscription_notice(
                notice("sub_1", "user_1", &["pro"]),
                SubscriptionStatus::Active,
                ts(10),
            )
            .await
            .unwrap();

        assert_eq!(change.kind, ChangeKind::Applied);
        assert_eq!(change.callbacks[0].kind, CallbackKind::SubscriptionActivated);
        assert!(manager.is_subscribed(&user("user_1"), &product("pro")));
    }

    #[tokio::test]
    async fn older_notice_is_stale() {
        let Harness { manager, .. } = manager();
        seed(&manager, "sub_1", "user_1", &["pro"], 10).await;
        manager
            .apply_subscription_notice(
                notice("sub_1", "user_1", &["pro"]),
                SubscriptionStatus::Cancelling,
                ts(20),
            )
            .await
            .unwrap();

        let change = manager
            .apply_subscription_notice(
                notice("sub_1", "user_1", &["pro"]),
                SubscriptionStatus::Active,
                ts(15),
            )
            .await
            .unwrap();

        assert_eq!(change.kind, ChangeKind::Stale);
        let stored = manager.get_subscription(&sub_id("sub_1")).await.unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Cancelling);
    }

    #[tokio::test]
    async fn repeated_status_is_unchanged_and_silent() {
        let Harness { manager, .. } = manager();
        seed(&manager, "sub_1", "user_1", &["pro"], 10).await;

        let change = manager
            .apply_subscription_notice(
                notice("sub_1", "user_1", &["pro", "addon"]),
                SubscriptionStatus::Active,
                ts(20),
            )
            .await
            .unwrap();

        assert_eq!(change.kind, ChangeKind::Unchanged);
        assert!(change.callbacks.is_empty());
        // Details still follow the gateway.
        assert!(manager.is_subscribed(&user("user_1"), &product("addon")));
    }

    #[tokio::test]
    async fn reactivating_cancelled_subscription_is_inconsistent() {
        let Harness { manager, .. } = manager();
        seed(&manager, "sub_1", "user_1", &["pro"], 10).await;
        manager
            .apply_subscription_notice(
                notice("sub_1", "user_1", &["pro"]),
                SubscriptionStatus::Cancelled,
                ts(20),
            )
            .await
            .unwrap();

        let change = manager
            .apply_subscription_notice(
                notice("sub_1", "user_1", &["pro"]),
                SubscriptionStatus::Active,
                ts(30),
            )
            .await
            .unwrap();

        assert_eq!(change.kind, ChangeKind::Inconsistent);
        assert!(!manager.is_subscribed(&user("user_1"), &product("pro")));
    }

    #[tokio::test]
    async fn notice_for_other_user_is_inconsistent() {
        let Harness { manager, .. } = manager();
        seed(&manager, "sub_1", "user_1", &["pro"], 10).await;

        let change = manager
            .apply_subscription_notice(
                notice("sub_1", "user_2", &["pro"]),
                SubscriptionStatus::Cancelled,
                ts(20),
            )
            .await
            .unwrap();

        assert_eq!(change.kind, ChangeKind::Inconsistent);
        assert!(manager.is_subscribed(&user("user_1"), &product("pro")));
    }

    #[tokio::test]
    async fn sync_applies_remote_status() {
        let Harness {
            manager,
            gateway,
            recorder,
            ..
        } = manager();
        seed(&manager, "sub_1", "user_1", &["pro"], 10).await;
        gateway.add_subscription(RemoteSubscription {
            id: sub_id("sub_1"),
            customer_ref: "cus_user_1".to_string(),
            status: SubscriptionStatus::Cancelled,
            product_refs: vec!["gw_pro".to_string()],
        });

        let kind = manager.sync_subscription(&sub_id("sub_1")).await.unwrap();

        assert_eq!(kind, ChangeKind::Applied);
        assert_eq!(recorder.count(CallbackKind::SubscriptionCancelled), 1);
        let stored = manager.get_subscription(&sub_id("sub_1")).await.unwrap();
        assert_eq!(stored.product_refs, vec![product("pro")]);
    }
}
