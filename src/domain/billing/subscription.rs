//! Subscription lifecycle.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    ProductId, StateMachine, SubscriptionId, Timestamp, UserId, ValidationError,
};

/// Subscription status.
///
/// `Cancelling` means the cancellation takes effect at period end and a
/// definitive cancellation from the gateway is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelling,
    Cancelled,
}

impl SubscriptionStatus {
    /// Returns true if the subscriber keeps access in this status.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Cancelling)
    }
}

impl StateMachine for SubscriptionStatus {
    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Active => vec![Cancelling, Cancelled],
            // Cancelling -> Active is the resubscribe recovery path.
            Cancelling => vec![Cancelled, Active],
            Cancelled => vec![],
        }
    }
}

/// When a requested cancellation takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelMode {
    Immediate,
    AtPeriodEnd,
}

impl CancelMode {
    pub fn from_immediate(immediate: bool) -> Self {
        if immediate {
            CancelMode::Immediate
        } else {
            CancelMode::AtPeriodEnd
        }
    }

    /// Status the subscription ends up in.
    pub fn target_status(&self) -> SubscriptionStatus {
        match self {
            CancelMode::Immediate => SubscriptionStatus::Cancelled,
            CancelMode::AtPeriodEnd => SubscriptionStatus::Cancelling,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CancelMode::Immediate => "immediate",
            CancelMode::AtPeriodEnd => "at_period_end",
        }
    }
}

/// A user's subscription to one or more products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub customer_ref: String,
    pub status: SubscriptionStatus,
    pub product_refs: Vec<ProductId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Timestamp of the newest change applied; older events are stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<Timestamp>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        user_id: UserId,
        customer_ref: impl Into<String>,
        status: SubscriptionStatus,
        product_refs: Vec<ProductId>,
        created_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        if product_refs.is_empty() {
            return Err(ValidationError::empty_field("product_refs"));
        }
        Ok(Self {
            id,
            user_id,
            customer_ref: customer_ref.into(),
            status,
            product_refs,
            created_at,
            updated_at: created_at,
            last_event_at: Some(created_at),
        })
    }

    pub fn covers(&self, product_ref: &ProductId) -> bool {
        self.product_refs.contains(product_ref)
    }

    /// Returns true if a change dated `at` predates what was already applied.
    pub fn is_stale(&self, at: &Timestamp) -> bool {
        self.last_event_at.map_or(false, |applied| at.is_before(&applied))
    }

    /// Moves to `target`, advancing the watermark.
    ///
    /// Returns false when already in `target`.
    pub fn transition(
        &mut self,
        target: SubscriptionStatus,
        at: Timestamp,
    ) -> Result<bool, ValidationError> {
        self.observe(at);
        if self.status == target {
            return Ok(false);
        }
        self.status = self.status.transition_to(target)?;
        self.updated_at = at;
        Ok(true)
    }

    /// Replaces gateway-owned attributes that are not part of the lifecycle.
    pub fn refresh_details(&mut self, customer_ref: String, product_refs: Vec<ProductId>) {
        self.customer_ref = customer_ref;
        if !product_refs.is_empty() {
            self.product_refs = product_refs;
        }
    }

    fn observe(&mut self, at: Timestamp) {
        if self.last_event_at.map_or(true, |applied| at.is_after(&applied)) {
            self.last_event_at = Some(at);
        }
    }
}
