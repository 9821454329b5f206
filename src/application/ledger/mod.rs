//! Ledger - payment records and line-item refunds.
//!
//! Payments are keyed by gateway transaction id: every mutation of a payment
//! holds the `payment_txn:<txn>` lock, and replays of the same or an older
//! gateway record are no-ops.

mod charge;
mod query;
mod reconcile;
mod record;
mod refund;

pub use charge::{ChargeCommand, ChargeItem};
pub use query::PaymentQuery;
pub use reconcile::PaymentReconciliation;
pub use record::RecordOutcome;

use std::sync::Arc;

use super::callbacks::CallbackRegistry;
use super::catalog::ProductCatalog;
use super::locks::EntityLocks;
use super::records::{keys, Records};
use crate::config::LedgerConfig;
use crate::domain::billing::Payment;
use crate::domain::foundation::{BillingError, PaymentId, UserId};
use crate::ports::GatewayClient;

/// Owns payment records and the refund state machine.
pub struct Ledger {
    records: Records,
    locks: EntityLocks,
    gateway: Arc<dyn GatewayClient>,
    catalog: Arc<ProductCatalog>,
    callbacks: CallbackRegistry,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(
        records: Records,
        locks: EntityLocks,
        gateway: Arc<dyn GatewayClient>,
        catalog: Arc<ProductCatalog>,
        callbacks: CallbackRegistry,
        config: LedgerConfig,
    ) -> Self {
        Self {
            records,
            locks,
            gateway,
            catalog,
            callbacks,
            config,
        }
    }

    /// Returns a payment by local id.
    pub async fn get_payment(&self, payment_id: &PaymentId) -> Result<Payment, BillingError> {
        self.records
            .load::<Payment>(&keys::payment(payment_id))
            .await?
            .ok_or_else(|| BillingError::not_found("payment", payment_id))
    }

    /// Returns the payment recorded for a gateway transaction.
    pub async fn find_by_transaction(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<Payment>, BillingError> {
        let payment_id = self
            .records
            .load::<PaymentId>(&keys::payment_txn(gateway_transaction_id))
            .await?;
        match payment_id {
            Some(id) => Ok(self.records.load(&keys::payment(&id)).await?),
            None => Ok(None),
        }
    }

    async fn save_payment(&self, payment: &Payment) -> Result<(), BillingError> {
        self.records
            .save(&keys::payment(&payment.id), payment)
            .await?;
        Ok(())
    }

    /// Deletes every payment of `user_id`; returns how many were removed.
    pub async fn delete_user_payments(&self, user_id: &UserId) -> Result<usize, BillingError> {
        let index = self
            .records
            .load_all::<PaymentId>(&keys::payment_user_prefix(user_id))
            .await?;

        let mut deleted = 0;
        for (index_key, payment_id) in index {
            if let Some(payment) = self.records.load::<Payment>(&keys::payment(&payment_id)).await? {
                let _guard = self
                    .locks
                    .acquire(super::locks::payment_lock(&payment.gateway_transaction_id))
                    .await;
                self.records
                    .delete(&keys::payment_txn(&payment.gateway_transaction_id))
                    .await?;
                self.records.delete(&keys::payment(&payment_id)).await?;
                deleted += 1;
            }
            self.records.delete(&index_key).await?;
        }
        Ok(deleted)
    }
}
