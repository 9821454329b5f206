//! Webhook Dispatcher - authenticated, deduplicated ingestion of gateway events.
//!
//! A delivery goes through: verify signature, decode, take the event lock,
//! check the dedup record, apply to the Ledger or Subscription Manager,
//! write the dedup record, release, then run callbacks. Everything but a
//! bad signature, a malformed body or a storage failure is acknowledged.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::callbacks::CallbackRegistry;
use super::change::{Change, ChangeKind};
use super::ledger::Ledger;
use super::locks::EntityLocks;
use super::records::{keys, Records};
use super::subscriptions::SubscriptionManager;
use crate::domain::billing::{EventBody, GatewayEvent, WebhookError, WebhookVerifier};
use crate::domain::foundation::{BillingError, Timestamp};

/// How an acknowledged event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Applied, or already reflected in the stored state.
    Applied,
    /// This event id was processed before.
    Duplicate,
    /// Older than the state already applied.
    Stale,
    /// Unknown event type.
    Ignored,
    /// Contradicts stored state; logged for manual repair.
    Inconsistent,
}

impl From<ChangeKind> for WebhookOutcome {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Applied | ChangeKind::Unchanged => WebhookOutcome::Applied,
            ChangeKind::Stale => WebhookOutcome::Stale,
            ChangeKind::Inconsistent => WebhookOutcome::Inconsistent,
        }
    }
}

/// Acknowledgement returned to the gateway (HTTP 200).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub event_id: String,
    pub outcome: WebhookOutcome,
}

/// Dedup record kept per processed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub outcome: WebhookOutcome,
    pub processed_at: Timestamp,
}

pub struct WebhookDispatcher {
    verifier: WebhookVerifier,
    records: Records,
    locks: EntityLocks,
    ledger: Arc<Ledger>,
    subscriptions: Arc<SubscriptionManager>,
    callbacks: CallbackRegistry,
}

impl WebhookDispatcher {
    pub fn new(
        verifier: WebhookVerifier,
        records: Records,
        locks: EntityLocks,
        ledger: Arc<Ledger>,
        subscriptions: Arc<SubscriptionManager>,
        callbacks: CallbackRegistry,
    ) -> Self {
        Self {
            verifier,
            records,
            locks,
            ledger,
            subscriptions,
            callbacks,
        }
    }

    /// Handles one webhook delivery.
    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookAck, WebhookError> {
        // 1. Authenticate before looking at the body
        self.verifier.verify(payload, signature)?;
        let event = GatewayEvent::decode(payload)?;
        let dedup_key = event.dedup_key();

        let (outcome, change) = {
            let _guard = self.locks.acquire(dedup_key.clone()).await;

            // 2. Deduplicate
            if self
                .records
                .load::<ProcessedEvent>(&dedup_key)
                .await
                .map_err(|e| WebhookError::Storage(e.to_string()))?
                .is_some()
            {
                tracing::debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Duplicate webhook delivery acknowledged"
                );
                return Ok(WebhookAck {
                    event_id: event.id,
                    outcome: WebhookOutcome::Duplicate,
                });
            }

            // 3. Route and apply
            let (outcome, change) = match self.route(&event).await {
                Ok(Some(change)) => (WebhookOutcome::from(change.kind), change),
                Ok(None) => (WebhookOutcome::Ignored, Change::of(ChangeKind::Unchanged)),
                Err(BillingError::InconsistentState(reason)) => {
                    tracing::error!(
                        kind = "INCONSISTENT_STATE",
                        event_id = %event.id,
                        reason = %reason,
                        "Webhook contradicts stored state"
                    );
                    (WebhookOutcome::Inconsistent, Change::of(ChangeKind::Inconsistent))
                }
                Err(err) => return Err(into_webhook_error(&event, err)),
            };

            // 4. Remember the event once its effects are durable
            let processed = ProcessedEvent {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                outcome,
                processed_at: Timestamp::now(),
            };
            self.records
                .save(&dedup_key, &processed)
                .await
                .map_err(|e| {
                    tracing::error!(
                        event_id = %event.id,
                        error = %e,
                        "Dedup record not written, event stays re-deliverable"
                    );
                    WebhookError::Storage(e.to_string())
                })?;
            (outcome, change)
        };

        // 5. Callbacks, outside every lock
        let events = change
            .callbacks
            .into_iter()
            .map(|cb| cb.caused_by(event.id.clone()))
            .collect();
        self.callbacks.notify(events).await;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = ?outcome,
            "Webhook processed"
        );
        Ok(WebhookAck {
            event_id: event.id,
            outcome,
        })
    }

    async fn route(&self, event: &GatewayEvent) -> Result<Option<Change>, BillingError> {
        match &event.body {
            EventBody::Payment(payment) => {
                let (_, change) = self.ledger.apply_payment(payment.clone()).await?;
                Ok(Some(change))
            }
            EventBody::Refund(notice) => Ok(Some(
                self.ledger
                    .apply_refund_notice(notice.clone(), event.created)
                    .await?,
            )),
            EventBody::Subscription { notice, status } => Ok(Some(
                self.subscriptions
                    .apply_subscription_notice(notice.clone(), *status, event.created)
                    .await?,
            )),
            EventBody::Unknown => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Unknown webhook type acknowledged"
                );
                Ok(None)
            }
        }
    }

    /// Deletes dedup records processed before `cutoff`.
    pub async fn purge_events_before(&self, cutoff: Timestamp) -> Result<usize, BillingError> {
        let processed = self
            .records
            .load_all::<ProcessedEvent>(keys::WEBHOOK_EVENT_PREFIX)
            .await?;

        let mut purged = 0;
        for (key, record) in processed {
            if !record.processed_at.is_before(&cutoff) {
                continue;
            }
            let _guard = self.locks.acquire(key.clone()).await;
            self.records.delete(&key).await?;
            purged += 1;
        }
        tracing::info!(purged, cutoff = ?cutoff, "Purged webhook dedup records");
        Ok(purged)
    }
}

fn into_webhook_error(event: &GatewayEvent, err: BillingError) -> WebhookError {
    match err {
        BillingError::Validation(_) | BillingError::NotFound { .. } => {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %err,
                "Webhook body rejected"
            );
            WebhookError::MalformedPayload(err.to_string())
        }
        other => {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %other,
                "Webhook not applied"
            );
            WebhookError::Storage(other.to_string())
        }
    }
}
