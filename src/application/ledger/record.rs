//! Idempotent upsert of gateway payment records.

use super::Ledger;
use crate::application::change::{Change, ChangeKind};
use crate::application::locks::payment_lock;
use crate::application::records::keys;
use crate::domain::billing::Payment;
use crate::domain::foundation::BillingError;
use crate::ports::{CallbackEvent, CallbackKind};

/// What `record_payment` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    /// A record with the same timestamp was already stored.
    Unchanged,
    /// Something newer was already applied; the record was discarded.
    Stale,
}

impl Ledger {
    /// Upserts a payment by gateway transaction id.
    pub async fn record_payment(&self, payment: Payment) -> Result<RecordOutcome, BillingError> {
        let (outcome, change) = self.apply_payment(payment).await?;
        self.callbacks.notify(change.callbacks).await;
        Ok(outcome)
    }

    /// Upsert without notifying; the caller owns callback delivery.
    pub(crate) async fn apply_payment(
        &self,
        mut payment: Payment,
    ) -> Result<(RecordOutcome, Change), BillingError> {
        payment.validate()?;
        // The watermark is local state, never taken from the wire.
        payment.last_event_at = None;
        let _guard = self
            .locks
            .acquire(payment_lock(&payment.gateway_transaction_id))
            .await;

        let Some(mut existing) = self.find_by_transaction(&payment.gateway_transaction_id).await?
        else {
            self.save_payment(&payment).await?;
            self.records
                .save(
                    &keys::payment_txn(&payment.gateway_transaction_id),
                    &payment.id,
                )
                .await?;
            self.records
                .save(&keys::payment_user(&payment.user_id, &payment.id), &payment.id)
                .await?;
            tracing::info!(
                payment_id = %payment.id,
                gateway_transaction_id = %payment.gateway_transaction_id,
                user_id = %payment.user_id,
                amount = payment.amount_total(),
                "Payment recorded"
            );
            let event = CallbackEvent::payment(CallbackKind::PaymentRecorded, &payment);
            return Ok((RecordOutcome::Created, Change::applied(vec![event])));
        };

        if existing.is_stale(&payment.timestamp) {
            tracing::info!(
                gateway_transaction_id = %payment.gateway_transaction_id,
                incoming = ?payment.timestamp,
                applied = ?existing.applied_at(),
                "Payment record older than applied state, discarding"
            );
            return Ok((RecordOutcome::Stale, Change::of(ChangeKind::Stale)));
        }
        if !payment.timestamp.is_after(&existing.timestamp) {
            tracing::debug!(
                gateway_transaction_id = %payment.gateway_transaction_id,
                "Payment record not newer than stored one, ignoring"
            );
            return Ok((RecordOutcome::Unchanged, Change::of(ChangeKind::Unchanged)));
        }

        if payment.user_id != existing.user_id {
            tracing::error!(
                kind = "INCONSISTENT_STATE",
                gateway_transaction_id = %payment.gateway_transaction_id,
                stored_user = %existing.user_id,
                incoming_user = %payment.user_id,
                "Payment record changed owner, ignoring"
            );
            return Ok((RecordOutcome::Unchanged, Change::of(ChangeKind::Inconsistent)));
        }

        let merged = existing.merge_newer(payment);
        if let Some(rejected) = merged.rejected_status {
            tracing::error!(
                kind = "INCONSISTENT_STATE",
                gateway_transaction_id = %existing.gateway_transaction_id,
                stored = ?existing.status,
                incoming = ?rejected,
                "Payment status would move backwards, keeping stored status"
            );
        }
        self.save_payment(&existing).await?;
        tracing::info!(
            payment_id = %existing.id,
            gateway_transaction_id = %existing.gateway_transaction_id,
            status = ?existing.status,
            "Payment updated"
        );
        let event = CallbackEvent::payment(CallbackKind::PaymentRecorded, &existing);
        Ok((RecordOutcome::Updated, Change::applied(vec![event])))
    }
}
