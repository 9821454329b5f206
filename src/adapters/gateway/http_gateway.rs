//! HTTP gateway adapter.
//!
//! Implements `GatewayClient` against the gateway's JSON API.
//!
//! # Retries
//!
//! - Reads are always retried on `NetworkError` and `RateLimited`
//! - Writes are retried only when the caller supplied an idempotency key
//! - `GatewayRejected` and `AuthError` are never retried
//!
//! # Configuration
//!
//! ```ignore
//! let config = GatewayConfig::new("https://api.gateway.example", api_key);
//! let client = HttpGatewayClient::new(&config)?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::{header, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::GatewayConfig;
use crate::domain::foundation::SubscriptionId;
use crate::ports::{
    CancelReceipt, CancelRequest, ChargeReceipt, ChargeRequest, CreateProductRequest,
    GatewayClient, GatewayError, RefundReceipt, RefundRequest, RemotePayment, RemoteProduct,
    RemoteSubscription,
};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Bounded exponential retry schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build();
        backoff.reset();
        backoff
    }
}

impl From<&GatewayConfig> for RetryPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: 2.0,
        }
    }
}

/// Gateway client speaking JSON over HTTPS.
pub struct HttpGatewayClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct ProductList {
    data: Vec<RemoteProduct>,
}

#[derive(serde::Serialize)]
struct CancelBody {
    at_period_end: bool,
}

impl HttpGatewayClient {
    /// Build a client from configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::from(config),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Runs `call`, retrying transient failures when `retry_allowed`.
    async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        retry_allowed: bool,
        call: F,
    ) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = if retry_allowed {
            self.retry.max_attempts
        } else {
            1
        };
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let call = &call;

        backoff::future::retry_notify(
            self.retry.backoff(),
            move || async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                match call().await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_retryable() && attempt < max_attempts => {
                        match err.retry_after {
                            Some(wait) => Err(backoff::Error::retry_after(err, wait)),
                            None => Err(backoff::Error::transient(err)),
                        }
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            },
            |err: GatewayError, wait: Duration| {
                tracing::warn!(
                    operation,
                    attempt = attempts.load(Ordering::SeqCst),
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Gateway call failed, retrying"
                );
            },
        )
        .await
    }

    /// Sends one request; `Ok(None)` means the gateway answered 404.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        idempotency_key: Option<&str>,
    ) -> Result<Option<T>, GatewayError> {
        let mut request = request.bearer_auth(self.api_key.expose_secret());
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::network(format!("request timed out: {}", e))
            } else {
                GatewayError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), error = %body, "Gateway request failed");
            return Err(error_from_status(status, body, retry_after));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| GatewayError::rejected(format!("unreadable gateway response: {}", e)))
    }

    /// Like `send`, but a 404 is a rejection.
    async fn send_required<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        idempotency_key: Option<&str>,
        what: &str,
    ) -> Result<T, GatewayError> {
        self.send(request, idempotency_key)
            .await?
            .ok_or_else(|| GatewayError::rejected(format!("{} not found", what)))
    }
}

/// Maps a non-success, non-404 status into the error taxonomy.
fn error_from_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> GatewayError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::auth(message),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::rate_limited(message, retry_after),
        s if s.is_client_error() => GatewayError::rejected(message),
        _ => GatewayError::network(message),
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        let url = self.url("/v1/charges");
        let key = request.idempotency_key.as_deref();
        self.execute("charge", key.is_some(), || {
            self.send_required(self.http_client.post(&url).json(&request), key, "charge")
        })
        .await
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        let url = self.url("/v1/refunds");
        let key = request.idempotency_key.as_deref();
        self.execute("refund", key.is_some(), || {
            self.send_required(
                self.http_client.post(&url).json(&request),
                key,
                "transaction",
            )
        })
        .await
    }

    async fn cancel(&self, request: CancelRequest) -> Result<CancelReceipt, GatewayError> {
        let url = self.url(&format!("/v1/subscriptions/{}/cancel", request.subscription_id));
        let key = request.idempotency_key.as_deref();
        let body = CancelBody {
            at_period_end: request.at_period_end,
        };
        self.execute("cancel", key.is_some(), || {
            self.send_required(self.http_client.post(&url).json(&body), key, "subscription")
        })
        .await
    }

    async fn resume_subscription(
        &self,
        subscription_id: &SubscriptionId,
        idempotency_key: Option<String>,
    ) -> Result<RemoteSubscription, GatewayError> {
        let url = self.url(&format!("/v1/subscriptions/{}/resume", subscription_id));
        let key = idempotency_key.as_deref();
        self.execute("resume_subscription", key.is_some(), || {
            self.send_required(self.http_client.post(&url), key, "subscription")
        })
        .await
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<RemoteSubscription>, GatewayError> {
        let url = self.url(&format!("/v1/subscriptions/{}", subscription_id));
        self.execute("fetch_subscription", true, || {
            self.send(self.http_client.get(&url), None)
        })
        .await
    }

    async fn fetch_payment(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<RemotePayment>, GatewayError> {
        let url = self.url(&format!("/v1/payments/{}", gateway_transaction_id));
        self.execute("fetch_payment", true, || {
            self.send(self.http_client.get(&url), None)
        })
        .await
    }

    async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<RemoteProduct, GatewayError> {
        let url = self.url("/v1/products");
        let key = request.idempotency_key.as_deref();
        self.execute("create_product", key.is_some(), || {
            self.send_required(self.http_client.post(&url).json(&request), key, "product")
        })
        .await
    }

    async fn list_products(&self) -> Result<Vec<RemoteProduct>, GatewayError> {
        let url = self.url("/v1/products");
        let list: ProductList = self
            .execute("list_products", true, || {
                self.send_required(self.http_client.get(&url), None, "catalog")
            })
            .await?;
        Ok(list.data)
    }
}
