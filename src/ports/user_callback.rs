//! User callback port - hooks notified after a state change is committed.
//!
//! Callbacks run after the entity store write; a failing callback is logged
//! and never rolls the change back.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::billing::{Payment, Subscription};

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    PaymentRecorded,
    PaymentRefunded,
    SubscriptionActivated,
    SubscriptionCancelling,
    SubscriptionCancelled,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::PaymentRecorded => "payment_recorded",
            CallbackKind::PaymentRefunded => "payment_refunded",
            CallbackKind::SubscriptionActivated => "subscription_activated",
            CallbackKind::SubscriptionCancelling => "subscription_cancelling",
            CallbackKind::SubscriptionCancelled => "subscription_cancelled",
        }
    }
}

/// Entity state after the committed change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entity", content = "state", rename_all = "snake_case")]
pub enum EntityState {
    Payment(Payment),
    Subscription(Subscription),
}

/// Notification delivered to registered callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackEvent {
    pub kind: CallbackKind,
    pub entity: EntityState,
    /// Gateway event that caused the change; `None` for API-driven changes.
    pub source_event_id: Option<String>,
}

impl CallbackEvent {
    pub fn payment(kind: CallbackKind, payment: &Payment) -> Self {
        Self {
            kind,
            entity: EntityState::Payment(payment.clone()),
            source_event_id: None,
        }
    }

    pub fn subscription(kind: CallbackKind, subscription: &Subscription) -> Self {
        Self {
            kind,
            entity: EntityState::Subscription(subscription.clone()),
            source_event_id: None,
        }
    }

    pub fn caused_by(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }
}

/// Failure reported by a callback.
#[derive(Debug, Clone, Error)]
#[error("Callback failed: {0}")]
pub struct CallbackError(pub String);

/// Port for user-level hooks (fulfilment, notifications, ...).
#[async_trait]
pub trait UserCallback: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn on_event(&self, event: &CallbackEvent) -> Result<(), CallbackError>;
}
