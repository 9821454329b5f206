//! Wiring of the engine's components over one store and one gateway.

use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;

use super::callbacks::CallbackRegistry;
use super::catalog::{ProductCatalog, SyncReport};
use super::ledger::{Ledger, PaymentQuery};
use super::locks::EntityLocks;
use super::records::Records;
use super::subscriptions::{CancelSubscriptionResult, IndexRebuildReport, SubscriptionManager};
use super::webhooks::{WebhookAck, WebhookDispatcher};
use crate::adapters::HttpGatewayClient;
use crate::config::{AppConfig, LedgerConfig};
use crate::domain::billing::{Payment, WebhookError, WebhookVerifier, DEFAULT_TOLERANCE_SECS};
use crate::domain::foundation::{BillingError, PaymentId, ProductId, Timestamp, UserId};
use crate::ports::{EntityStore, GatewayClient, UserCallback};

/// Tunables the engine needs beyond its store and gateway.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub webhook_secret: SecretString,
    pub webhook_tolerance_secs: i64,
    pub event_retention_days: i64,
    pub ledger: LedgerConfig,
    /// Allow pushing config-defined products to the gateway catalog.
    pub can_create_products: bool,
}

impl EngineSettings {
    pub fn new(webhook_secret: SecretString) -> Self {
        Self {
            webhook_secret,
            webhook_tolerance_secs: DEFAULT_TOLERANCE_SECS,
            event_retention_days: 30,
            ledger: LedgerConfig::default(),
            can_create_products: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            webhook_secret: config.webhook.secret.clone(),
            webhook_tolerance_secs: config.webhook.tolerance_secs,
            event_retention_days: config.webhook.event_retention_days,
            ledger: config.ledger,
            can_create_products: config.gateway.can_create_products,
        }
    }
}

/// What `delete_user_data` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletedUserData {
    pub payments: usize,
    pub subscriptions: usize,
}

/// Entry point for hosts: owns every component and their shared state.
pub struct BillingEngine {
    catalog: Arc<ProductCatalog>,
    ledger: Arc<Ledger>,
    subscriptions: Arc<SubscriptionManager>,
    webhooks: WebhookDispatcher,
    callbacks: CallbackRegistry,
    event_retention_days: i64,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        gateway: Arc<dyn GatewayClient>,
        settings: EngineSettings,
    ) -> Self {
        let records = Records::new(store);
        let locks = EntityLocks::new();
        let callbacks = CallbackRegistry::new();

        let catalog = Arc::new(ProductCatalog::new(
            records.clone(),
            locks.clone(),
            gateway.clone(),
            settings.can_create_products,
        ));
        let ledger = Arc::new(Ledger::new(
            records.clone(),
            locks.clone(),
            gateway.clone(),
            catalog.clone(),
            callbacks.clone(),
            settings.ledger,
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(
            records.clone(),
            locks.clone(),
            gateway,
            callbacks.clone(),
        ));
        let verifier = WebhookVerifier::new(settings.webhook_secret)
            .with_tolerance_secs(settings.webhook_tolerance_secs);
        let webhooks = WebhookDispatcher::new(
            verifier,
            records,
            locks,
            ledger.clone(),
            subscriptions.clone(),
            callbacks.clone(),
        );

        Self {
            catalog,
            ledger,
            subscriptions,
            webhooks,
            callbacks,
            event_retention_days: settings.event_retention_days,
        }
    }

    /// Builds an engine talking to the configured HTTP gateway.
    pub fn from_config(store: Arc<dyn EntityStore>, config: &AppConfig) -> Result<Self, BillingError> {
        let gateway = HttpGatewayClient::new(&config.gateway)?;
        Ok(Self::new(
            store,
            Arc::new(gateway),
            EngineSettings::from_config(config),
        ))
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn webhooks(&self) -> &WebhookDispatcher {
        &self.webhooks
    }

    /// Adds a hook run after every committed change.
    pub fn register_callback(&self, callback: Arc<dyn UserCallback>) {
        self.callbacks.register(callback);
    }

    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookAck, WebhookError> {
        self.webhooks.handle_event(payload, signature).await
    }

    pub async fn get_payments(&self, query: PaymentQuery) -> Result<Vec<Payment>, BillingError> {
        self.ledger.get_payments(query).await
    }

    pub async fn create_refund(
        &self,
        payment_id: &PaymentId,
        line_item_ids: Option<Vec<String>>,
        reason: Option<String>,
    ) -> Result<Payment, BillingError> {
        self.ledger
            .create_refund(payment_id, line_item_ids, reason)
            .await
    }

    pub async fn cancel_subscription(
        &self,
        user_id: &UserId,
        product_refs: &[ProductId],
        immediate: bool,
        throw_if_missing: bool,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        self.subscriptions
            .cancel_subscription(user_id, product_refs, immediate, throw_if_missing)
            .await
    }

    pub fn get_active_subscriptions(&self, user_id: &UserId) -> Vec<ProductId> {
        self.subscriptions.get_active_subscriptions(user_id)
    }

    pub fn is_subscribed(&self, user_id: &UserId, product_ref: &ProductId) -> bool {
        self.subscriptions.is_subscribed(user_id, product_ref)
    }

    pub async fn sync_catalog(&self) -> Result<SyncReport, BillingError> {
        self.catalog.sync_from_gateway().await
    }

    pub async fn rebuild_index(&self) -> Result<IndexRebuildReport, BillingError> {
        self.subscriptions.rebuild_index().await
    }

    /// Purges dedup records older than the retention window.
    pub async fn purge_expired_events(&self) -> Result<usize, BillingError> {
        let cutoff = Timestamp::now().add_days(-self.event_retention_days);
        self.webhooks.purge_events_before(cutoff).await
    }

    /// Removes every payment and subscription of a user.
    pub async fn delete_user_data(&self, user_id: &UserId) -> Result<DeletedUserData, BillingError> {
        let payments = self.ledger.delete_user_payments(user_id).await?;
        let subscriptions = self.subscriptions.delete_user_subscriptions(user_id).await?;
        tracing::info!(user_id = %user_id, payments, subscriptions, "User billing data deleted");
        Ok(DeletedUserData {
            payments,
            subscriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEntityStore, MockGateway};
    use crate::config::{GatewayConfig, WebhookConfig};
    use crate::domain::billing::fixtures;

    fn engine() -> BillingEngine {
        BillingEngine::new(
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(MockGateway::new()),
            EngineSettings::new(SecretString::new("whsec_test".to_string())),
        )
    }

    #[tokio::test]
    async fn delete_user_data_reports_counts() {
        let engine = engine();
        engine
            .ledger()
            .record_payment(fixtures::payment("txn_1", 1, vec![fixtures::item("li_1", 100)]))
            .await
            .unwrap();

        let deleted = engine
            .delete_user_data(&UserId::new("user_1").unwrap())
            .await
            .unwrap();

        assert_eq!(
            deleted,
            DeletedUserData {
                payments: 1,
                subscriptions: 0,
            }
        );
    }

    #[tokio::test]
    async fn purge_keeps_recent_events() {
        let engine = engine();
        assert_eq!(engine.purge_expired_events().await.unwrap(), 0);
    }

    #[test]
    fn settings_follow_config() {
        let config = AppConfig {
            environment: Default::default(),
            gateway: GatewayConfig::new("https://api.gateway.example", "sk_test"),
            webhook: WebhookConfig::new("whsec_test"),
            ledger: LedgerConfig {
                default_page_limit: 10,
                max_page_limit: 20,
            },
            catalog: Default::default(),
            logging: Default::default(),
        };

        let settings = EngineSettings::from_config(&config);

        assert_eq!(settings.ledger.max_page_limit, 20);
        assert_eq!(settings.webhook_tolerance_secs, 300);
        assert!(!settings.can_create_products);
    }

    #[test]
    fn from_config_builds_http_gateway() {
        let config = AppConfig {
            environment: Default::default(),
            gateway: GatewayConfig::new("https://api.gateway.example", "sk_test"),
            webhook: WebhookConfig::new("whsec_test"),
            ledger: Default::default(),
            catalog: Default::default(),
            logging: Default::default(),
        };

        assert!(BillingEngine::from_config(Arc::new(InMemoryEntityStore::new()), &config).is_ok());
    }
}
