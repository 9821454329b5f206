//! Comparing stored payments with the gateway's view.

use serde::Serialize;

use super::Ledger;
use crate::domain::billing::money::within_tolerance;
use crate::domain::billing::PaymentStatus;
use crate::domain::foundation::BillingError;

/// Local and remote amounts of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReconciliation {
    pub gateway_transaction_id: String,
    pub local_amount: i64,
    pub remote_amount: i64,
    pub local_refunded: i64,
    pub remote_refunded: i64,
    pub local_status: PaymentStatus,
    pub remote_status: PaymentStatus,
}

impl PaymentReconciliation {
    /// True when both sides agree within rounding tolerance.
    pub fn is_consistent(&self) -> bool {
        within_tolerance(self.local_amount, self.remote_amount)
            && within_tolerance(self.local_refunded, self.remote_refunded)
            && self.local_status == self.remote_status
    }
}

impl Ledger {
    /// Fetches a transaction from the gateway and compares it with the
    /// stored payment. Nothing is written; mismatches are logged.
    pub async fn reconcile_payment(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<PaymentReconciliation, BillingError> {
        let local = self
            .find_by_transaction(gateway_transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment", gateway_transaction_id))?;
        let remote = self
            .gateway
            .fetch_payment(gateway_transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("gateway_payment", gateway_transaction_id))?;

        let report = PaymentReconciliation {
            gateway_transaction_id: gateway_transaction_id.to_string(),
            local_amount: local.amount_total(),
            remote_amount: remote.amount,
            local_refunded: local.refunded_amount(),
            remote_refunded: remote.refunded_amount,
            local_status: local.status,
            remote_status: remote.status,
        };
        if !report.is_consistent() {
            tracing::error!(
                kind = "INCONSISTENT_STATE",
                gateway_transaction_id,
                local_amount = report.local_amount,
                remote_amount = report.remote_amount,
                local_refunded = report.local_refunded,
                remote_refunded = report.remote_refunded,
                "Payment disagrees with the gateway"
            );
        }
        Ok(report)
    }
}
