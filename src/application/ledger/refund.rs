//! Refunds: locally requested, and reported by the gateway.

use std::collections::HashSet;

use super::Ledger;
use crate::application::change::{Change, ChangeKind};
use crate::application::locks::payment_lock;
use crate::domain::billing::{LineItemStatus, Payment, RefundNotice};
use crate::domain::foundation::{BillingError, PaymentId, Timestamp, ValidationError};
use crate::ports::{CallbackEvent, CallbackKind, RefundRequest};

impl Ledger {
    /// Refunds line items of a payment through the gateway.
    ///
    /// With `line_item_ids` omitted, every item still `paid` is refunded.
    /// Items move `paid -> refunding` before the gateway call and to
    /// `refunded` only once it succeeds; on failure they return to `paid`
    /// and the gateway error is returned. The call is never retried here.
    pub async fn create_refund(
        &self,
        payment_id: &PaymentId,
        line_item_ids: Option<Vec<String>>,
        reason: Option<String>,
    ) -> Result<Payment, BillingError> {
        let txn = self.get_payment(payment_id).await?.gateway_transaction_id;
        let _guard = self.locks.acquire(payment_lock(&txn)).await;
        // Re-read under the lock.
        let mut payment = self.get_payment(payment_id).await?;

        let targets = select_refund_targets(&payment, line_item_ids)?;
        let mut amount = 0;
        for id in &targets {
            if let Some(item) = payment.line_item_mut(id) {
                item.begin_refund()?;
                amount += item.total;
            }
        }
        self.save_payment(&payment).await?;

        let request = RefundRequest {
            gateway_transaction_id: payment.gateway_transaction_id.clone(),
            amount,
            line_item_ids: targets.clone(),
            reason,
            idempotency_key: None,
        };

        match self.gateway.refund(request).await {
            Ok(receipt) => {
                for id in &targets {
                    if let Some(item) = payment.line_item_mut(id) {
                        item.complete_refund()?;
                    }
                }
                self.save_payment(&payment).await?;
                tracing::info!(
                    payment_id = %payment.id,
                    refund_id = %receipt.refund_id,
                    amount,
                    items = ?targets,
                    "Refund completed"
                );
                let event = CallbackEvent::payment(CallbackKind::PaymentRefunded, &payment);
                self.callbacks.notify(vec![event]).await;
                Ok(payment)
            }
            Err(err) => {
                for id in &targets {
                    if let Some(item) = payment.line_item_mut(id) {
                        item.rollback_refund();
                    }
                }
                if let Err(store_err) = self.persist_rollback(&payment).await {
                    tracing::error!(
                        kind = "INCONSISTENT_STATE",
                        payment_id = %payment.id,
                        gateway_error = %err,
                        error = %store_err,
                        "Refund rollback not persisted, items left refunding"
                    );
                    return Err(BillingError::InconsistentState(format!(
                        "refund of payment '{}' failed ({}) and its rollback was not persisted: {}",
                        payment.id, err, store_err
                    )));
                }
                tracing::warn!(
                    payment_id = %payment.id,
                    amount,
                    error = %err,
                    "Gateway refund failed, line items rolled back"
                );
                Err(err.into())
            }
        }
    }

    /// Saves rolled-back items, retrying the write once.
    async fn persist_rollback(&self, payment: &Payment) -> Result<(), BillingError> {
        if let Err(err) = self.save_payment(payment).await {
            tracing::warn!(
                payment_id = %payment.id,
                error = %err,
                "Refund rollback write failed, retrying"
            );
            return self.save_payment(payment).await;
        }
        Ok(())
    }

    /// Applies a refund or adjustment the gateway reported at `created`.
    ///
    /// A notice older than the payment's applied state is discarded.
    pub(crate) async fn apply_refund_notice(
        &self,
        notice: RefundNotice,
        created: Timestamp,
    ) -> Result<Change, BillingError> {
        let _guard = self
            .locks
            .acquire(payment_lock(&notice.gateway_transaction_id))
            .await;

        let Some(mut payment) = self.find_by_transaction(&notice.gateway_transaction_id).await?
        else {
            tracing::error!(
                kind = "INCONSISTENT_STATE",
                gateway_transaction_id = %notice.gateway_transaction_id,
                "Refund reported for an unknown transaction"
            );
            return Ok(Change::of(ChangeKind::Inconsistent));
        };

        if payment.is_stale(&created) {
            tracing::info!(
                payment_id = %payment.id,
                gateway_transaction_id = %notice.gateway_transaction_id,
                created = ?created,
                applied = ?payment.applied_at(),
                "Refund notice older than applied state, discarding"
            );
            return Ok(Change::of(ChangeKind::Stale));
        }

        let targets = match match_refund_notice(&payment, &notice) {
            Ok(targets) => targets,
            Err(reason) => {
                tracing::error!(
                    kind = "INCONSISTENT_STATE",
                    payment_id = %payment.id,
                    gateway_transaction_id = %notice.gateway_transaction_id,
                    amount = ?notice.amount,
                    reason = %reason,
                    "Refund notice matches no line item"
                );
                return Ok(Change::of(ChangeKind::Inconsistent));
            }
        };

        let mut refunded = false;
        for id in &targets {
            if let Some(item) = payment.line_item_mut(id) {
                refunded |= item.force_refunded();
            }
        }
        let mut status_changed = false;
        if let Some(status) = notice.status {
            if status != payment.status {
                tracing::info!(
                    payment_id = %payment.id,
                    from = ?payment.status,
                    to = ?status,
                    "Payment status adjusted by gateway"
                );
                payment.status = status;
                status_changed = true;
            }
        }

        if !refunded && !status_changed {
            return Ok(Change::of(ChangeKind::Unchanged));
        }
        payment.advance_watermark(created);
        self.save_payment(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            items = ?targets,
            "Gateway refund applied"
        );

        let kind = if refunded {
            CallbackKind::PaymentRefunded
        } else {
            CallbackKind::PaymentRecorded
        };
        Ok(Change::applied(vec![CallbackEvent::payment(kind, &payment)]))
    }
}

/// Resolves which items a local refund request covers.
fn select_refund_targets(
    payment: &Payment,
    line_item_ids: Option<Vec<String>>,
) -> Result<Vec<String>, BillingError> {
    let Some(requested) = line_item_ids else {
        let paid = payment.paid_item_ids();
        if paid.is_empty() {
            return Err(ValidationError::invalid_format(
                "line_items",
                format!("payment '{}' has nothing left to refund", payment.id),
            )
            .into());
        }
        return Ok(paid);
    };

    if requested.is_empty() {
        return Err(ValidationError::empty_field("line_items").into());
    }
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for id in requested {
        let item = payment
            .line_item(&id)
            .ok_or_else(|| BillingError::not_found("line_item", &id))?;
        if item.status != LineItemStatus::Paid {
            return Err(ValidationError::invalid_format(
                "line_items",
                format!("line item '{}' is {:?}, not paid", id, item.status),
            )
            .into());
        }
        if seen.insert(id.clone()) {
            targets.push(id);
        }
    }
    Ok(targets)
}

/// Resolves which items a gateway refund notice covers.
///
/// Named items win. Otherwise the amount must equal the whole refundable
/// balance, or one refundable item; an amount equal to an already refunded
/// item resolves to nothing.
fn match_refund_notice(payment: &Payment, notice: &RefundNotice) -> Result<Vec<String>, String> {
    if !notice.line_item_ids.is_empty() {
        if let Some(unknown) = notice
            .line_item_ids
            .iter()
            .find(|id| payment.line_item(id).is_none())
        {
            return Err(format!("unknown line item '{}'", unknown));
        }
        return Ok(notice.line_item_ids.clone());
    }

    let Some(amount) = notice.amount else {
        // Status-only adjustment.
        return Ok(Vec::new());
    };

    let refundable: Vec<_> = payment
        .line_items
        .iter()
        .filter(|item| item.status != LineItemStatus::Refunded)
        .collect();
    let balance: i64 = refundable.iter().map(|item| item.total).sum();
    if !refundable.is_empty() && amount == balance {
        return Ok(refundable.iter().map(|item| item.id.clone()).collect());
    }

    let matches = |total: i64, subtotal: i64| amount == total || amount == subtotal;
    if let Some(item) = refundable.iter().find(|i| matches(i.total, i.subtotal)) {
        return Ok(vec![item.id.clone()]);
    }
    if payment
        .line_items
        .iter()
        .any(|i| i.status == LineItemStatus::Refunded && matches(i.total, i.subtotal))
    {
        return Ok(Vec::new());
    }
    Err(format!("amount {} matches no refundable line item", amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::tests::{ledger, Harness};
    use crate::domain::billing::{fixtures, PaymentStatus};
    use crate::ports::GatewayError;
    use std::time::Duration;

    fn two_items() -> Payment {
        fixtures::payment(
            "txn_1",
            100,
            vec![fixtures::item("li_1", 1000), fixtures::item("li_2", 500)],
        )
    }

    fn notice(amount: Option<i64>, ids: &[&str]) -> RefundNotice {
        RefundNotice {
            gateway_transaction_id: "txn_1".to_string(),
            amount,
            line_item_ids: ids.iter().map(|s| s.to_string()).collect(),
            status: None,
        }
    }

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn statuses(payment: &Payment) -> Vec<LineItemStatus> {
        payment.line_items.iter().map(|i| i.status).collect()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // create_refund
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn partial_refund_moves_only_selected_items() {
        let Harness { ledger, gateway, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        let refunded = ledger
            .create_refund(&payment.id, Some(vec!["li_1".to_string()]), None)
            .await
            .unwrap();

        assert_eq!(
            statuses(&refunded),
            vec![LineItemStatus::Refunded, LineItemStatus::Paid]
        );
        let call = &gateway.calls()[0];
        assert_eq!(call.args, vec!["txn_1".to_string(), "1100".to_string()]);
        assert!(call.idempotency_key.is_none());
    }

    #[tokio::test]
    async fn omitted_items_refund_remaining_balance() {
        let Harness { ledger, gateway, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();
        ledger
            .create_refund(&payment.id, Some(vec!["li_2".to_string()]), None)
            .await
            .unwrap();

        let refunded = ledger.create_refund(&payment.id, None, None).await.unwrap();

        assert!(refunded.is_fully_refunded());
        assert_eq!(gateway.calls()[1].args[1], "1100");
    }

    #[tokio::test]
    async fn failed_gateway_refund_rolls_back_to_paid() {
        let Harness { ledger, gateway, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();
        gateway.set_method_error("refund", GatewayError::network("connection reset"));

        let err = ledger
            .create_refund(&payment.id, Some(vec!["li_1".to_string()]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NetworkError(_)));
        let stored = ledger.get_payment(&payment.id).await.unwrap();
        assert_eq!(
            statuses(&stored),
            vec![LineItemStatus::Paid, LineItemStatus::Paid]
        );
        assert_eq!(gateway.call_count("refund"), 1);
    }

    #[tokio::test]
    async fn unpersisted_rollback_is_reported_as_inconsistent() {
        let Harness {
            ledger,
            gateway,
            store,
            ..
        } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();
        gateway.set_method_error("refund", GatewayError::network("connection reset"));
        gateway.set_delay(Duration::from_millis(50));

        // Storage goes down while the gateway call is in flight.
        let (result, _) = tokio::join!(
            ledger.create_refund(&payment.id, Some(vec!["li_1".to_string()]), None),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                store.set_fail_writes(true);
            }
        );

        let err = result.unwrap_err();
        assert!(matches!(err, BillingError::InconsistentState(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn refunding_a_refunded_item_is_rejected() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();
        ledger
            .create_refund(&payment.id, Some(vec!["li_1".to_string()]), None)
            .await
            .unwrap();

        let err = ledger
            .create_refund(&payment.id, Some(vec!["li_1".to_string()]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let Harness { ledger, gateway, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        let err = ledger
            .create_refund(&payment.id, Some(vec!["li_9".to_string()]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound { entity: "line_item", .. }));
        assert!(!gateway.was_called("refund"));
    }

    #[tokio::test]
    async fn nothing_refundable_is_rejected() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();
        ledger.create_refund(&payment.id, None, None).await.unwrap();

        let err = ledger.create_refund(&payment.id, None, None).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Gateway refund notices
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn notice_for_paid_item_forces_refunded() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        let change = ledger
            .apply_refund_notice(notice(None, &["li_2"]), at(200))
            .await
            .unwrap();

        assert_eq!(change.kind, ChangeKind::Applied);
        assert_eq!(change.callbacks[0].kind, CallbackKind::PaymentRefunded);
        let stored = ledger.get_payment(&payment.id).await.unwrap();
        assert_eq!(
            statuses(&stored),
            vec![LineItemStatus::Paid, LineItemStatus::Refunded]
        );
    }

    #[tokio::test]
    async fn notice_for_refunded_item_is_a_no_op() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();
        ledger.apply_refund_notice(notice(Some(550), &[]), at(200)).await.unwrap();

        let again = ledger.apply_refund_notice(notice(Some(550), &[]), at(200)).await.unwrap();

        assert_eq!(again.kind, ChangeKind::Unchanged);
        assert!(again.callbacks.is_empty());
    }

    #[tokio::test]
    async fn amount_equal_to_balance_refunds_everything() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        ledger.apply_refund_notice(notice(Some(1650), &[]), at(200)).await.unwrap();

        assert!(ledger.get_payment(&payment.id).await.unwrap().is_fully_refunded());
    }

    #[tokio::test]
    async fn amount_matching_subtotal_selects_item() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        ledger.apply_refund_notice(notice(Some(1000), &[]), at(200)).await.unwrap();

        let stored = ledger.get_payment(&payment.id).await.unwrap();
        assert_eq!(
            statuses(&stored),
            vec![LineItemStatus::Refunded, LineItemStatus::Paid]
        );
    }

    #[tokio::test]
    async fn unmatched_amount_is_inconsistent_and_changes_nothing() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        let change = ledger.apply_refund_notice(notice(Some(777), &[]), at(200)).await.unwrap();

        assert_eq!(change.kind, ChangeKind::Inconsistent);
        assert_eq!(ledger.get_payment(&payment.id).await.unwrap(), payment);
    }

    #[tokio::test]
    async fn notice_for_unknown_transaction_is_inconsistent() {
        let Harness { ledger, .. } = ledger();
        let change = ledger.apply_refund_notice(notice(Some(10), &[]), at(200)).await.unwrap();
        assert_eq!(change.kind, ChangeKind::Inconsistent);
    }

    #[tokio::test]
    async fn adjustment_sets_status_explicitly() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        let mut adjustment = notice(None, &[]);
        adjustment.status = Some(PaymentStatus::PastDue);
        let change = ledger.apply_refund_notice(adjustment, at(200)).await.unwrap();

        assert_eq!(change.callbacks[0].kind, CallbackKind::PaymentRecorded);
        assert_eq!(
            ledger.get_payment(&payment.id).await.unwrap().status,
            PaymentStatus::PastDue
        );
    }

    #[tokio::test]
    async fn adjustment_older_than_the_payment_is_stale() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();

        let mut adjustment = notice(None, &[]);
        adjustment.status = Some(PaymentStatus::PastDue);
        let change = ledger.apply_refund_notice(adjustment, at(50)).await.unwrap();

        assert_eq!(change.kind, ChangeKind::Stale);
        assert!(change.callbacks.is_empty());
        assert_eq!(ledger.get_payment(&payment.id).await.unwrap(), payment);
    }

    #[tokio::test]
    async fn applied_notice_advances_the_watermark() {
        let Harness { ledger, .. } = ledger();
        let payment = two_items();
        ledger.record_payment(payment.clone()).await.unwrap();
        ledger.apply_refund_notice(notice(None, &["li_2"]), at(300)).await.unwrap();

        let mut adjustment = notice(None, &[]);
        adjustment.status = Some(PaymentStatus::PastDue);
        let change = ledger.apply_refund_notice(adjustment, at(250)).await.unwrap();
        let newer = fixtures::payment("txn_1", 280, vec![fixtures::item("li_1", 1000)]);
        let (outcome, _) = ledger.apply_payment(newer).await.unwrap();

        assert_eq!(change.kind, ChangeKind::Stale);
        assert_eq!(outcome, crate::application::ledger::RecordOutcome::Stale);
        let stored = ledger.get_payment(&payment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Paid);
        assert_eq!(stored.applied_at().as_unix_secs(), 300);
    }
}
