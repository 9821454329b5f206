//! Product catalog: local definitions reconciled with the gateway catalog.
//!
//! Config-defined products have no gateway reference until they are created
//! remotely; gateway-defined products are mirrored locally under their
//! gateway reference. Products are matched by `gateway_ref`.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::locks::EntityLocks;
use super::records::{keys, Records};
use crate::domain::billing::{Currency, Product};
use crate::domain::foundation::{BillingError, ProductId, ValidationError};
use crate::ports::{CreateProductRequest, GatewayClient, RemoteProduct};

const CATALOG_LOCK: &str = "catalog";

/// Counts from one catalog sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Local mirrors created for remote products.
    pub created: usize,
    /// Config-defined products created at the gateway.
    pub created_remote: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Non-fatal problems; affected products stay unpurchasable.
    pub warnings: Vec<String>,
}

/// Canonical product definitions.
pub struct ProductCatalog {
    records: Records,
    locks: EntityLocks,
    gateway: Arc<dyn GatewayClient>,
    can_create_products: bool,
}

impl ProductCatalog {
    pub fn new(
        records: Records,
        locks: EntityLocks,
        gateway: Arc<dyn GatewayClient>,
        can_create_products: bool,
    ) -> Self {
        Self {
            records,
            locks,
            gateway,
            can_create_products,
        }
    }

    /// Returns a product or plan by id.
    pub async fn get_product(&self, id: &ProductId) -> Result<Product, BillingError> {
        if let Some(product) = self.records.load::<Product>(&keys::product(id)).await? {
            return Ok(product);
        }
        // Plans are stored inside their parent.
        self.list_products()
            .await?
            .iter()
            .find_map(|parent| parent.find(id).cloned())
            .ok_or_else(|| BillingError::not_found("product", id))
    }

    /// All top-level products, in id order.
    pub async fn list_products(&self) -> Result<Vec<Product>, BillingError> {
        let products = self.records.load_all::<Product>(keys::PRODUCT_PREFIX).await?;
        Ok(products.into_iter().map(|(_, product)| product).collect())
    }

    /// Stores config-defined products that are not stored yet.
    ///
    /// Stored records win: they may already carry a gateway reference.
    pub async fn load_definitions(&self, products: Vec<Product>) -> Result<usize, BillingError> {
        let _guard = self.locks.acquire(CATALOG_LOCK).await;

        let mut stored = 0;
        for product in products {
            product.validate()?;
            let key = keys::product(&product.id);
            if self.records.load::<Product>(&key).await?.is_some() {
                continue;
            }
            self.records.save(&key, &product).await?;
            stored += 1;
        }
        tracing::info!(stored, "Loaded product definitions");
        Ok(stored)
    }

    /// Fetches the remote catalog and reconciles against it.
    pub async fn sync_from_gateway(&self) -> Result<SyncReport, BillingError> {
        let remote = self.gateway.list_products().await?;
        self.sync_products(remote).await
    }

    /// Reconciles local products with `remote_products`.
    pub async fn sync_products(
        &self,
        remote_products: Vec<RemoteProduct>,
    ) -> Result<SyncReport, BillingError> {
        let _guard = self.locks.acquire(CATALOG_LOCK).await;

        let mut report = SyncReport::default();
        let mut locals = self.list_products().await?;
        let mut dirty: HashSet<ProductId> = HashSet::new();

        // Bridge config-defined products to the gateway, once each.
        for product in locals.iter_mut() {
            let parent_id = product.id.clone();
            let mut bridged = false;
            if product.has_plans() {
                for plan in product.plans.iter_mut() {
                    bridged |= self.bridge(plan, &mut report).await;
                }
            } else {
                bridged = self.bridge(product, &mut report).await;
            }
            if bridged {
                dirty.insert(parent_id);
            }
        }

        for remote in &remote_products {
            let mut matched = false;
            for product in locals.iter_mut() {
                let parent_id = product.id.clone();
                if let Some(local) = product.find_by_gateway_ref_mut(&remote.gateway_ref) {
                    matched = true;
                    match apply_remote(local, remote) {
                        Ok(true) => {
                            report.updated += 1;
                            dirty.insert(parent_id);
                        }
                        Ok(false) => report.unchanged += 1,
                        Err(err) => report.warn(format!(
                            "remote product '{}' not applied: {}",
                            remote.gateway_ref, err
                        )),
                    }
                    break;
                }
            }
            if matched {
                continue;
            }
            match mirror_of(remote) {
                Ok(mirror) => {
                    self.records
                        .save(&keys::product(&mirror.id), &mirror)
                        .await?;
                    report.created += 1;
                }
                Err(err) => report.warn(format!(
                    "remote product '{}' not mirrored: {}",
                    remote.gateway_ref, err
                )),
            }
        }

        for product in locals.iter().filter(|p| dirty.contains(&p.id)) {
            self.records
                .save(&keys::product(&product.id), product)
                .await?;
        }

        tracing::info!(
            created = report.created,
            created_remote = report.created_remote,
            updated = report.updated,
            unchanged = report.unchanged,
            warnings = report.warnings.len(),
            "Catalog synchronized"
        );
        Ok(report)
    }

    /// Creates `product` at the gateway if it has no reference yet.
    ///
    /// Returns true when the product gained a reference.
    async fn bridge(&self, product: &mut Product, report: &mut SyncReport) -> bool {
        if product.gateway_ref.is_some() {
            return false;
        }
        if !self.can_create_products {
            report.warn(format!(
                "product '{}' has no gateway reference and remote creation is disabled",
                product.id
            ));
            return false;
        }

        let request = CreateProductRequest {
            product_id: product.id.to_string(),
            name: product.name.clone(),
            price: product.price,
            currency: product.currency.to_string(),
            frequency: product.frequency,
            interval: product.interval,
            idempotency_key: Some(format!("product:{}", product.id)),
        };
        match self.gateway.create_product(request).await {
            Ok(remote) => {
                tracing::info!(
                    product_id = %product.id,
                    gateway_ref = %remote.gateway_ref,
                    "Created product at gateway"
                );
                product.gateway_ref = Some(remote.gateway_ref);
                report.created_remote += 1;
                true
            }
            Err(err) => {
                report.warn(format!(
                    "product '{}' could not be created at the gateway: {}",
                    product.id, err
                ));
                false
            }
        }
    }
}

impl SyncReport {
    fn warn(&mut self, warning: String) {
        tracing::warn!(warning = %warning, "Catalog sync warning");
        self.warnings.push(warning);
    }
}

/// Copies remote name, price, currency and billing period onto `local`.
fn apply_remote(local: &mut Product, remote: &RemoteProduct) -> Result<bool, ValidationError> {
    let mut updated = local.clone();
    updated.name = remote.name.clone();
    updated.price = remote.price;
    updated.currency = Currency::new(&remote.currency)?;
    if remote.frequency.is_some() {
        updated.frequency = remote.frequency;
        updated.interval = remote.interval;
    }
    if updated == *local {
        return Ok(false);
    }
    updated.validate()?;
    *local = updated;
    Ok(true)
}

fn mirror_of(remote: &RemoteProduct) -> Result<Product, ValidationError> {
    let mut product = Product::new(
        ProductId::new(remote.gateway_ref.clone())?,
        remote.name.clone(),
        remote.price,
        Currency::new(&remote.currency)?,
    )?
    .with_gateway_ref(remote.gateway_ref.clone());
    product.frequency = remote.frequency;
    product.interval = remote.interval;
    product.validate()?;
    Ok(product)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEntityStore, MockGateway};
    use crate::domain::billing::Frequency;
    use crate::ports::GatewayError;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn product(id: &str, price: i64) -> Product {
        Product::new(ProductId::new(id).unwrap(), format!("Product {}", id), price, usd()).unwrap()
    }

    fn remote(gateway_ref: &str, name: &str, price: i64) -> RemoteProduct {
        RemoteProduct {
            gateway_ref: gateway_ref.to_string(),
            name: name.to_string(),
            price,
            currency: "USD".to_string(),
            frequency: None,
            interval: None,
        }
    }

    fn catalog(gateway: &MockGateway, can_create: bool) -> ProductCatalog {
        ProductCatalog::new(
            Records::new(Arc::new(InMemoryEntityStore::new())),
            EntityLocks::new(),
            Arc::new(gateway.clone()),
            can_create,
        )
    }

    fn id(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Lookup
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn get_product_finds_top_level_and_plans() {
        let catalog = catalog(&MockGateway::new(), false);
        let parent = product("pro", 0)
            .with_plans(vec![product("pro_monthly", 1500).recurring(Frequency::Month, 1)]);
        catalog.load_definitions(vec![parent]).await.unwrap();

        assert_eq!(catalog.get_product(&id("pro")).await.unwrap().id, id("pro"));
        assert_eq!(
            catalog.get_product(&id("pro_monthly")).await.unwrap().price,
            1500
        );
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let catalog = catalog(&MockGateway::new(), false);
        let err = catalog.get_product(&id("nope")).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound { entity: "product", .. }));
    }

    #[tokio::test]
    async fn load_definitions_never_overwrites_stored_products() {
        let catalog = catalog(&MockGateway::new(), false);
        catalog
            .load_definitions(vec![product("basic", 1000).with_gateway_ref("gw_basic")])
            .await
            .unwrap();

        let stored = catalog
            .load_definitions(vec![product("basic", 1200)])
            .await
            .unwrap();

        assert_eq!(stored, 0);
        let basic = catalog.get_product(&id("basic")).await.unwrap();
        assert_eq!(basic.gateway_ref.as_deref(), Some("gw_basic"));
        assert_eq!(basic.price, 1000);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Sync
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn sync_creates_updates_and_counts_unchanged() {
        let catalog = catalog(&MockGateway::new(), false);
        catalog
            .load_definitions(vec![
                product("basic", 1000).with_gateway_ref("gw_basic"),
                product("team", 5000).with_gateway_ref("gw_team"),
            ])
            .await
            .unwrap();

        let report = catalog
            .sync_products(vec![
                remote("gw_basic", "Product basic", 1000),
                remote("gw_team", "Team", 4500),
                remote("gw_addon", "Add-on", 300),
            ])
            .await
            .unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 1);
        assert_eq!(catalog.get_product(&id("team")).await.unwrap().price, 4500);
        let mirror = catalog.get_product(&id("gw_addon")).await.unwrap();
        assert!(mirror.is_purchasable());
    }

    #[tokio::test]
    async fn sync_creates_missing_products_remotely_once() {
        let gateway = MockGateway::new();
        let catalog = catalog(&gateway, true);
        catalog
            .load_definitions(vec![product("basic", 1000)])
            .await
            .unwrap();

        let first = catalog.sync_from_gateway().await.unwrap();
        let second = catalog.sync_from_gateway().await.unwrap();

        assert_eq!(first.created_remote, 1);
        assert_eq!(second.created_remote, 0);
        assert_eq!(second.unchanged, 1);
        assert_eq!(gateway.call_count("create_product"), 1);
        let basic = catalog.get_product(&id("basic")).await.unwrap();
        assert_eq!(basic.gateway_ref.as_deref(), Some("gw_basic"));
        assert_eq!(
            gateway.calls()[1].idempotency_key.as_deref(),
            Some("product:basic")
        );
    }

    #[tokio::test]
    async fn plans_are_bridged_individually() {
        let gateway = MockGateway::new();
        let catalog = catalog(&gateway, true);
        let parent = product("pro", 0).with_plans(vec![
            product("pro_monthly", 1500).recurring(Frequency::Month, 1),
            product("pro_yearly", 15000).recurring(Frequency::Year, 1),
        ]);
        catalog.load_definitions(vec![parent]).await.unwrap();

        let report = catalog.sync_products(vec![]).await.unwrap();

        assert_eq!(report.created_remote, 2);
        let yearly = catalog.get_product(&id("pro_yearly")).await.unwrap();
        assert!(yearly.is_purchasable());
        assert!(!catalog.get_product(&id("pro")).await.unwrap().is_purchasable());
    }

    #[tokio::test]
    async fn failed_remote_creation_is_a_warning() {
        let gateway = MockGateway::new();
        gateway.set_method_error("create_product", GatewayError::rejected("no"));
        let catalog = catalog(&gateway, true);
        catalog
            .load_definitions(vec![product("basic", 1000)])
            .await
            .unwrap();

        let report = catalog.sync_products(vec![]).await.unwrap();

        assert_eq!(report.created_remote, 0);
        assert_eq!(report.warnings.len(), 1);
        assert!(!catalog.get_product(&id("basic")).await.unwrap().is_purchasable());
    }

    #[tokio::test]
    async fn remote_creation_disabled_is_a_warning() {
        let gateway = MockGateway::new();
        let catalog = catalog(&gateway, false);
        catalog
            .load_definitions(vec![product("basic", 1000)])
            .await
            .unwrap();

        let report = catalog.sync_products(vec![]).await.unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(!gateway.was_called("create_product"));
    }

    #[tokio::test]
    async fn invalid_remote_product_is_skipped_with_warning() {
        let catalog = catalog(&MockGateway::new(), false);
        let mut bad = remote("gw_bad", "Bad", 100);
        bad.currency = "dollars".to_string();

        let report = catalog.sync_products(vec![bad]).await.unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.warnings.len(), 1);
    }
}
