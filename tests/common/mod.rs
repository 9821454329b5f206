//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::json;
use std::sync::{Arc, Mutex, Once};

use billing_reconciler::adapters::{InMemoryEntityStore, MockGateway};
use billing_reconciler::application::{BillingEngine, EngineSettings, WebhookAck};
use billing_reconciler::domain::billing::{
    signature_header, BillingDetails, Currency, LineItem, Payment, PaymentStatus, WebhookError,
};
use billing_reconciler::domain::foundation::{PaymentId, ProductId, Timestamp, UserId};
use billing_reconciler::ports::{CallbackError, CallbackEvent, CallbackKind, UserCallback};

pub const SECRET: &str = "whsec_integration";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("warn,billing_reconciler=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// =============================================================================
// Callback recorder
// =============================================================================

/// Keeps every notification it receives.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<CallbackEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<CallbackKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: CallbackKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl UserCallback for Recorder {
    fn name(&self) -> &str {
        "integration-recorder"
    }

    async fn on_event(&self, event: &CallbackEvent) -> Result<(), CallbackError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Engine harness
// =============================================================================

pub struct TestEngine {
    pub engine: Arc<BillingEngine>,
    pub gateway: MockGateway,
    pub store: Arc<InMemoryEntityStore>,
    pub recorder: Arc<Recorder>,
}

impl TestEngine {
    pub fn new() -> Self {
        init_tracing();
        let store = Arc::new(InMemoryEntityStore::new());
        let gateway = MockGateway::new();
        let engine = BillingEngine::new(
            store.clone(),
            Arc::new(gateway.clone()),
            EngineSettings::new(SecretString::new(SECRET.to_string())),
        );
        let recorder = Arc::new(Recorder::default());
        engine.register_callback(recorder.clone());
        Self {
            engine: Arc::new(engine),
            gateway,
            store,
            recorder,
        }
    }

    /// Signs and delivers a raw payload the way the gateway would.
    pub async fn deliver(&self, payload: &[u8]) -> Result<WebhookAck, WebhookError> {
        let signature = signature_header(SECRET, now_secs(), payload).unwrap();
        self.engine.handle_webhook(payload, &signature).await
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn product(id: &str) -> ProductId {
    ProductId::new(id).unwrap()
}

pub fn rate(percent: i64) -> Decimal {
    Decimal::new(percent, 2)
}

/// Line item for one unit of `prod_<id>` at 10% tax.
pub fn item(id: &str, price: i64) -> LineItem {
    LineItem::priced(id, product(&format!("prod_{}", id)), price, 1, rate(10), 0).unwrap()
}

pub fn payment(txn: &str, created: i64, items: Vec<LineItem>) -> Payment {
    Payment {
        id: PaymentId::new(format!("pay_{}", txn)).unwrap(),
        user_id: user("user_1"),
        customer_ref: "cus_1".to_string(),
        gateway_transaction_id: txn.to_string(),
        timestamp: Timestamp::from_unix_secs(created).unwrap(),
        status: PaymentStatus::Paid,
        currency: Currency::new("USD").unwrap(),
        line_items: items,
        billing_details: BillingDetails::default(),
        subscription_ref: None,
        last_event_at: None,
    }
}

pub fn envelope(id: &str, event_type: &str, created: i64, data: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "type": event_type,
        "created": created,
        "data": data,
    }))
    .unwrap()
}

pub fn payment_event(id: &str, payment: &Payment) -> Vec<u8> {
    envelope(
        id,
        "payment",
        payment.timestamp.as_unix_secs(),
        serde_json::to_value(payment).unwrap(),
    )
}

/// Subscription `sub_1` of `user_1` on product `pro`.
pub fn subscription_event(id: &str, status: &str, created: i64) -> Vec<u8> {
    envelope(
        id,
        "subscription",
        created,
        json!({
            "id": "sub_1",
            "user_id": "user_1",
            "customer_ref": "cus_1",
            "status": status,
            "product_refs": ["pro"],
        }),
    )
}

pub fn subscription_cancelled_event(id: &str, created: i64) -> Vec<u8> {
    envelope(
        id,
        "subscription_cancelled",
        created,
        json!({
            "id": "sub_1",
            "user_id": "user_1",
            "customer_ref": "cus_1",
            "product_refs": ["pro"],
        }),
    )
}
