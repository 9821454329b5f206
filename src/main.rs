//! One-shot reconcile job: load product definitions, sync the catalog with
//! the gateway, rebuild the active-subscription index, purge old dedup
//! records, then exit.

use std::sync::Arc;

use billing_reconciler::adapters::{load_product_definitions, InMemoryEntityStore};
use billing_reconciler::application::BillingEngine;
use billing_reconciler::config::AppConfig;
use billing_reconciler::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    telemetry::init_tracing(&config.logging);
    config.validate()?;

    let store = Arc::new(InMemoryEntityStore::new());
    let engine = BillingEngine::from_config(store, &config)?;

    if let Some(path) = &config.catalog.definitions_path {
        let products = load_product_definitions(path).await?;
        let stored = engine.catalog().load_definitions(products).await?;
        tracing::info!(path = %path.display(), stored, "Product definitions loaded");
    }

    let sync = engine.sync_catalog().await?;
    for warning in &sync.warnings {
        tracing::warn!(%warning, "Catalog sync warning");
    }
    let index = engine.rebuild_index().await?;
    let purged = engine.purge_expired_events().await?;

    tracing::info!(
        created = sync.created,
        created_remote = sync.created_remote,
        updated = sync.updated,
        unchanged = sync.unchanged,
        users = index.users,
        conflicts = index.conflicts,
        purged,
        "Reconcile run finished"
    );
    Ok(())
}
