//! Payment records mirrored from the gateway.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::line_item::{LineItem, LineItemStatus};
use super::money::Currency;
use crate::domain::foundation::{
    PaymentId, StateMachine, SubscriptionId, Timestamp, UserId, ValidationError,
};

/// Settlement status reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Open,
    Paid,
    PastDue,
    Unknown,
}

impl StateMachine for PaymentStatus {
    fn valid_transitions(&self) -> Vec<Self> {
        use PaymentStatus::*;
        match self {
            Unknown => vec![Open, PastDue, Paid],
            Open => vec![PastDue, Paid],
            PastDue => vec![Paid],
            // Leaving paid needs an explicit adjustment event.
            Paid => vec![],
        }
    }
}

/// Billing contact captured with the payment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// A settled or pending gateway transaction and its line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub customer_ref: String,
    /// Unique per gateway transaction; the idempotency key for upserts.
    pub gateway_transaction_id: String,
    pub timestamp: Timestamp,
    pub status: PaymentStatus,
    pub currency: Currency,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub billing_details: BillingDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_ref: Option<SubscriptionId>,
    /// Creation time of the newest gateway notice applied on top of the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<Timestamp>,
}

/// What changed when a newer gateway record was merged in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The newer record tried to move the status backwards; it was kept.
    pub rejected_status: Option<PaymentStatus>,
}

impl Payment {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.gateway_transaction_id.trim().is_empty() {
            return Err(ValidationError::empty_field("gateway_transaction_id"));
        }
        if self.line_items.is_empty() {
            return Err(ValidationError::empty_field("line_items"));
        }
        let mut seen = HashSet::new();
        for item in &self.line_items {
            if !seen.insert(item.id.as_str()) {
                return Err(ValidationError::invalid_format(
                    "line_items",
                    format!("duplicate line item id '{}'", item.id),
                ));
            }
            item.validate()?;
        }
        Ok(())
    }

    pub fn line_item(&self, id: &str) -> Option<&LineItem> {
        self.line_items.iter().find(|item| item.id == id)
    }

    pub fn line_item_mut(&mut self, id: &str) -> Option<&mut LineItem> {
        self.line_items.iter_mut().find(|item| item.id == id)
    }

    pub fn amount_total(&self) -> i64 {
        self.line_items.iter().map(|item| item.total).sum()
    }

    pub fn refunded_amount(&self) -> i64 {
        self.sum_where(LineItemStatus::Refunded)
    }

    /// Remaining balance that can still be refunded.
    pub fn paid_balance(&self) -> i64 {
        self.sum_where(LineItemStatus::Paid)
    }

    /// Ids of line items still in `paid`.
    pub fn paid_item_ids(&self) -> Vec<String> {
        self.line_items
            .iter()
            .filter(|item| item.status == LineItemStatus::Paid)
            .map(|item| item.id.clone())
            .collect()
    }

    /// Newest point in time this record reflects.
    pub fn applied_at(&self) -> Timestamp {
        match self.last_event_at {
            Some(at) if at.is_after(&self.timestamp) => at,
            _ => self.timestamp,
        }
    }

    /// True when something at `at` is older than what was already applied.
    pub fn is_stale(&self, at: &Timestamp) -> bool {
        at.is_before(&self.applied_at())
    }

    /// Records that a gateway notice created at `at` was applied.
    pub fn advance_watermark(&mut self, at: Timestamp) {
        if at.is_after(&self.applied_at()) {
            self.last_event_at = Some(at);
        }
    }

    pub fn is_fully_refunded(&self) -> bool {
        self.line_items
            .iter()
            .all(|item| item.status == LineItemStatus::Refunded)
    }

    fn sum_where(&self, status: LineItemStatus) -> i64 {
        self.line_items
            .iter()
            .filter(|item| item.status == status)
            .map(|item| item.total)
            .sum()
    }

    /// Folds a newer record for the same transaction into this one.
    ///
    /// Status only moves forward and line items keep their furthest refund
    /// state; items missing from the newer record are retained.
    pub fn merge_newer(&mut self, newer: Payment) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        if newer.status != self.status {
            if self.status.can_transition_to(&newer.status) {
                self.status = newer.status;
            } else {
                outcome.rejected_status = Some(newer.status);
            }
        }

        for incoming in newer.line_items {
            match self.line_item_mut(&incoming.id) {
                Some(existing) => {
                    let status = if incoming.status.progress() > existing.status.progress() {
                        incoming.status
                    } else {
                        existing.status
                    };
                    *existing = LineItem { status, ..incoming };
                }
                None => self.line_items.push(incoming),
            }
        }

        self.timestamp = newer.timestamp;
        self.customer_ref = newer.customer_ref;
        self.billing_details = newer.billing_details;
        if newer.subscription_ref.is_some() {
            self.subscription_ref = newer.subscription_ref;
        }
        outcome
    }
}
