//! Gateway webhook delivery through `BillingEngine::handle_webhook`.
//!
//! The gateway delivers at least once and in any order, so these tests
//! check that:
//! 1. Redelivered events are acknowledged without a second effect
//! 2. Older events never overwrite newer state
//! 3. Rejected deliveries leave no trace and can be retried

mod common;

use billing_reconciler::application::{PaymentQuery, WebhookOutcome};
use billing_reconciler::domain::billing::{
    signature_header, LineItemStatus, PaymentStatus, SubscriptionStatus, WebhookError,
};
use billing_reconciler::domain::foundation::SubscriptionId;
use billing_reconciler::ports::CallbackKind;
use http::StatusCode;
use serde_json::json;

use common::*;

async fn payments(t: &TestEngine) -> Vec<billing_reconciler::domain::billing::Payment> {
    t.engine
        .get_payments(PaymentQuery::for_user(user("user_1")))
        .await
        .unwrap()
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn redelivered_payment_event_has_one_effect() {
    let t = TestEngine::new();
    let event = payment_event(
        "evt_1",
        &payment("txn_1", now_secs(), vec![item("li_1", 1000), item("li_2", 500)]),
    );

    let first = t.deliver(&event).await.unwrap();
    let after_first = payments(&t).await;
    let second = t.deliver(&event).await.unwrap();

    assert_eq!(first.outcome, WebhookOutcome::Applied);
    assert_eq!(second.outcome, WebhookOutcome::Duplicate);
    assert_eq!(payments(&t).await, after_first);
    assert_eq!(after_first[0].amount_total(), 1650);
    assert_eq!(t.recorder.count(CallbackKind::PaymentRecorded), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redeliveries_apply_once() {
    let t = TestEngine::new();
    let event = subscription_event("evt_1", "active", now_secs());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = t.engine.clone();
        let event = event.clone();
        let signature = signature_header(SECRET, now_secs(), &event).unwrap();
        handles.push(tokio::spawn(async move {
            engine.handle_webhook(&event, &signature).await
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap().outcome);
    }

    let applied = outcomes
        .iter()
        .filter(|o| **o == WebhookOutcome::Applied)
        .count();
    assert_eq!(applied, 1, "{outcomes:?}");
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, WebhookOutcome::Applied | WebhookOutcome::Duplicate)));
    assert_eq!(t.recorder.count(CallbackKind::SubscriptionActivated), 1);
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn older_subscription_event_does_not_reactivate() {
    let t = TestEngine::new();

    // E1 (newer) arrives before E2 (older).
    let e1 = t
        .deliver(&subscription_event("evt_e1", "cancelling", 2_000))
        .await
        .unwrap();
    let e2 = t
        .deliver(&subscription_event("evt_e2", "active", 1_000))
        .await
        .unwrap();

    assert_eq!(e1.outcome, WebhookOutcome::Applied);
    assert_eq!(e2.outcome, WebhookOutcome::Stale);
    let sub = t
        .engine
        .subscriptions()
        .get_subscription(&SubscriptionId::new("sub_1").unwrap())
        .await
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Cancelling);
    assert_eq!(t.recorder.kinds(), vec![CallbackKind::SubscriptionCancelling]);
}

#[tokio::test]
async fn older_payment_record_keeps_the_newer_one() {
    let t = TestEngine::new();
    let newer = payment("txn_1", 2_000, vec![item("li_1", 1000)]);
    let mut older = payment("txn_1", 1_000, vec![item("li_1", 1000)]);
    older.status = PaymentStatus::Open;

    t.deliver(&payment_event("evt_new", &newer)).await.unwrap();
    let ack = t.deliver(&payment_event("evt_old", &older)).await.unwrap();

    assert_eq!(ack.outcome, WebhookOutcome::Stale);
    let stored = payments(&t).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, PaymentStatus::Paid);
    assert_eq!(stored[0].timestamp.as_unix_secs(), 2_000);
}

#[tokio::test]
async fn late_adjustment_does_not_override_a_newer_payment() {
    let t = TestEngine::new();
    let recorded = payment("txn_1", 100, vec![item("li_1", 1000)]);
    t.deliver(&payment_event("evt_pay", &recorded)).await.unwrap();

    let adjustment = envelope(
        "evt_adjust",
        "adjustment",
        50,
        json!({ "gateway_transaction_id": "txn_1", "status": "past_due" }),
    );
    let ack = t.deliver(&adjustment).await.unwrap();

    assert_eq!(ack.outcome, WebhookOutcome::Stale);
    assert_eq!(payments(&t).await[0].status, PaymentStatus::Paid);
    assert_eq!(t.recorder.kinds(), vec![CallbackKind::PaymentRecorded]);
}

#[tokio::test]
async fn gateway_refund_event_marks_items_refunded() {
    let t = TestEngine::new();
    let recorded = payment("txn_1", now_secs(), vec![item("li_1", 1000), item("li_2", 500)]);
    t.deliver(&payment_event("evt_pay", &recorded)).await.unwrap();

    let refund = envelope(
        "evt_refund",
        "refund",
        now_secs(),
        json!({ "gateway_transaction_id": "txn_1", "line_item_ids": ["li_2"] }),
    );
    let ack = t.deliver(&refund).await.unwrap();

    assert_eq!(ack.outcome, WebhookOutcome::Applied);
    let stored = &payments(&t).await[0];
    assert_eq!(stored.line_item("li_1").unwrap().status, LineItemStatus::Paid);
    assert_eq!(stored.line_item("li_2").unwrap().status, LineItemStatus::Refunded);
    let refunded = t
        .recorder
        .events()
        .into_iter()
        .find(|e| e.kind == CallbackKind::PaymentRefunded)
        .unwrap();
    assert_eq!(refunded.source_event_id.as_deref(), Some("evt_refund"));
}

// =============================================================================
// Rejected deliveries
// =============================================================================

#[tokio::test]
async fn expired_signature_is_rejected() {
    let t = TestEngine::new();
    let event = subscription_event("evt_1", "active", now_secs());
    let signature = signature_header(SECRET, now_secs() - 3_600, &event).unwrap();

    let err = t.engine.handle_webhook(&event, &signature).await.unwrap_err();

    assert!(matches!(err, WebhookError::SignatureInvalid));
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert!(t.store.is_empty().await);
    assert!(t.recorder.events().is_empty());
}

#[tokio::test]
async fn storage_outage_is_retried_by_redelivery() {
    let t = TestEngine::new();
    let event = subscription_event("evt_1", "active", now_secs());
    t.store.set_fail_writes(true);

    let err = t.deliver(&event).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!t.engine.is_subscribed(&user("user_1"), &product("pro")));

    t.store.set_fail_writes(false);
    let ack = t.deliver(&event).await.unwrap();

    assert_eq!(ack.outcome, WebhookOutcome::Applied);
    assert!(t.engine.is_subscribed(&user("user_1"), &product("pro")));
    assert_eq!(t.recorder.count(CallbackKind::SubscriptionActivated), 1);
}

#[tokio::test]
async fn unknown_event_type_is_acknowledged() {
    let t = TestEngine::new();
    let event = envelope("evt_1", "invoice_finalized", now_secs(), json!({}));

    let ack = t.deliver(&event).await.unwrap();
    let again = t.deliver(&event).await.unwrap();

    assert_eq!(ack.outcome, WebhookOutcome::Ignored);
    assert_eq!(again.outcome, WebhookOutcome::Duplicate);
    assert!(t.recorder.events().is_empty());
}
