//! Mock gateway client for testing.
//!
//! Provides a configurable implementation of `GatewayClient` for unit and
//! integration tests. Supports:
//! - Error injection (next call, or per method until cleared)
//! - Artificial latency to widen race windows
//! - Call tracking
//! - A remote catalog, subscriptions and payments to answer fetches

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::billing::{PaymentStatus, SubscriptionStatus};
use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::ports::{
    CancelReceipt, CancelRequest, ChargeReceipt, ChargeRequest, CreateProductRequest,
    GatewayClient, GatewayError, RefundReceipt, RefundRequest, RemotePayment, RemoteProduct,
    RemoteSubscription,
};

/// Mock gateway for testing.
///
/// # Example
///
/// ```ignore
/// let gateway = MockGateway::new();
///
/// // Inject errors
/// gateway.set_method_error("refund", GatewayError::network("connection reset"));
///
/// // Assert on calls
/// assert!(gateway.was_called("refund"));
/// ```
#[derive(Default, Clone)]
pub struct MockGateway {
    /// Inner state (thread-safe for async tests).
    inner: Arc<Mutex<MockState>>,
    sequence: Arc<AtomicU64>,
}

#[derive(Default)]
struct MockState {
    /// Remote catalog returned by `list_products`.
    products: Vec<RemoteProduct>,

    /// Subscriptions answered by `fetch_subscription`.
    subscriptions: HashMap<String, RemoteSubscription>,

    /// Payments answered by `fetch_payment`.
    payments: HashMap<String, RemotePayment>,

    /// Error to return on next call.
    next_error: Option<GatewayError>,

    /// Specific errors by method name.
    method_errors: HashMap<String, GatewayError>,

    /// Latency added to every call.
    delay: Option<Duration>,

    /// Track method calls for assertions.
    call_log: Vec<MethodCall>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
    pub idempotency_key: Option<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Add a product to the remote catalog.
    pub fn add_remote_product(&self, product: RemoteProduct) {
        self.state().products.push(product);
    }

    /// Add a subscription to the remote side.
    pub fn add_subscription(&self, subscription: RemoteSubscription) {
        let id = subscription.id.to_string();
        self.state().subscriptions.insert(id, subscription);
    }

    /// Add a payment to the remote side.
    pub fn add_payment(&self, payment: RemotePayment) {
        let id = payment.gateway_transaction_id.clone();
        self.state().payments.insert(id, payment);
    }

    /// Set an error to return on the next call to any method.
    pub fn set_error(&self, error: GatewayError) {
        self.state().next_error = Some(error);
    }

    /// Set an error for a specific method until cleared.
    pub fn set_method_error(&self, method: &str, error: GatewayError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    /// Clear all configured errors.
    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.method_errors.clear();
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    /// Get all recorded method calls.
    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    /// Check if a method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.state().call_log.iter().any(|c| c.method == method)
    }

    /// Count calls to a method.
    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Records the call, waits out any delay, and returns an injected error.
    async fn enter(
        &self,
        method: &str,
        args: Vec<String>,
        idempotency_key: Option<String>,
    ) -> Result<(), GatewayError> {
        let (delay, error) = {
            let mut state = self.state();
            state.call_log.push(MethodCall {
                method: method.to_string(),
                args,
                idempotency_key,
            });
            let error = match state.next_error.take() {
                Some(err) => Some(err),
                None => state.method_errors.get(method).cloned(),
            };
            (state.delay, error)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        self.enter(
            "charge",
            vec![request.customer_ref.clone(), request.amount.to_string()],
            request.idempotency_key.clone(),
        )
        .await?;

        let receipt = ChargeReceipt {
            gateway_transaction_id: self.next_id("txn"),
            status: PaymentStatus::Paid,
            created: Timestamp::now().as_unix_secs(),
        };
        self.add_payment(RemotePayment {
            gateway_transaction_id: receipt.gateway_transaction_id.clone(),
            status: receipt.status,
            amount: request.amount,
            currency: request.currency,
            refunded_amount: 0,
        });
        Ok(receipt)
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        self.enter(
            "refund",
            vec![
                request.gateway_transaction_id.clone(),
                request.amount.to_string(),
            ],
            request.idempotency_key.clone(),
        )
        .await?;

        if let Some(payment) = self
            .state()
            .payments
            .get_mut(&request.gateway_transaction_id)
        {
            payment.refunded_amount += request.amount;
        }
        Ok(RefundReceipt {
            refund_id: self.next_id("re"),
            amount: request.amount,
        })
    }

    async fn cancel(&self, request: CancelRequest) -> Result<CancelReceipt, GatewayError> {
        self.enter(
            "cancel",
            vec![
                request.subscription_id.to_string(),
                request.at_period_end.to_string(),
            ],
            request.idempotency_key.clone(),
        )
        .await?;

        let status = if request.at_period_end {
            SubscriptionStatus::Cancelling
        } else {
            SubscriptionStatus::Cancelled
        };
        if let Some(sub) = self
            .state()
            .subscriptions
            .get_mut(request.subscription_id.as_str())
        {
            sub.status = status;
        }
        Ok(CancelReceipt {
            subscription_id: request.subscription_id,
            status,
        })
    }

    async fn resume_subscription(
        &self,
        subscription_id: &SubscriptionId,
        idempotency_key: Option<String>,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.enter(
            "resume_subscription",
            vec![subscription_id.to_string()],
            idempotency_key,
        )
        .await?;

        let mut state = self.state();
        let resumed = state
            .subscriptions
            .entry(subscription_id.to_string())
            .or_insert_with(|| RemoteSubscription {
                id: subscription_id.clone(),
                customer_ref: String::new(),
                status: SubscriptionStatus::Active,
                product_refs: Vec::new(),
            });
        resumed.status = SubscriptionStatus::Active;
        Ok(resumed.clone())
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<RemoteSubscription>, GatewayError> {
        self.enter("fetch_subscription", vec![subscription_id.to_string()], None)
            .await?;
        Ok(self
            .state()
            .subscriptions
            .get(subscription_id.as_str())
            .cloned())
    }

    async fn fetch_payment(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<RemotePayment>, GatewayError> {
        self.enter(
            "fetch_payment",
            vec![gateway_transaction_id.to_string()],
            None,
        )
        .await?;
        Ok(self.state().payments.get(gateway_transaction_id).cloned())
    }

    async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<RemoteProduct, GatewayError> {
        self.enter(
            "create_product",
            vec![request.product_id.clone()],
            request.idempotency_key.clone(),
        )
        .await?;

        let product = RemoteProduct {
            gateway_ref: format!("gw_{}", request.product_id),
            name: request.name,
            price: request.price,
            currency: request.currency,
            frequency: request.frequency,
            interval: request.interval,
        };
        self.add_remote_product(product.clone());
        Ok(product)
    }

    async fn list_products(&self) -> Result<Vec<RemoteProduct>, GatewayError> {
        self.enter("list_products", vec![], None).await?;
        Ok(self.state().products.clone())
    }
}
