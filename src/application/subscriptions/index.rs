//! Materialized per-user index of active products.
//!
//! The index is a projection of stored subscriptions: it can always be
//! rebuilt from the entity store and is never written through directly.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::SubscriptionManager;
use crate::application::locks::index_lock;
use crate::application::records::keys;
use crate::domain::billing::Subscription;
use crate::domain::foundation::{BillingError, ProductId, UserId};

#[derive(Default)]
pub(super) struct ActiveIndex {
    entries: DashMap<UserId, BTreeSet<ProductId>>,
}

impl ActiveIndex {
    pub(super) fn products(&self, user_id: &UserId) -> Vec<ProductId> {
        self.entries
            .get(user_id)
            .map(|products| products.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn contains(&self, user_id: &UserId, product_ref: &ProductId) -> bool {
        self.entries
            .get(user_id)
            .map_or(false, |products| products.contains(product_ref))
    }

    fn replace(&self, user_id: &UserId, products: BTreeSet<ProductId>) {
        if products.is_empty() {
            self.entries.remove(user_id);
        } else {
            self.entries.insert(user_id.clone(), products);
        }
    }

    fn users(&self) -> Vec<UserId> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Summary of a full index rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexRebuildReport {
    pub users: usize,
    pub subscriptions: usize,
    pub active_products: usize,
    /// Products covered by more than one access-granting subscription.
    pub conflicts: usize,
}

struct Projection {
    products: BTreeSet<ProductId>,
    conflicts: usize,
}

/// Computes one user's active products.
///
/// When several access-granting subscriptions cover a product, the most
/// recently created one is authoritative and the rest are reported.
fn project(user_id: &UserId, subscriptions: &[Subscription]) -> Projection {
    let mut owners: BTreeMap<&ProductId, Vec<&Subscription>> = BTreeMap::new();
    for sub in subscriptions.iter().filter(|s| s.status.grants_access()) {
        for product in &sub.product_refs {
            owners.entry(product).or_default().push(sub);
        }
    }

    let mut conflicts = 0;
    for (product, subs) in &owners {
        if subs.len() < 2 {
            continue;
        }
        conflicts += 1;
        let authoritative = subs
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(authoritative) = authoritative {
            let others: Vec<_> = subs
                .iter()
                .filter(|s| s.id != authoritative.id)
                .map(|s| s.id.to_string())
                .collect();
            tracing::error!(
                kind = "INCONSISTENT_STATE",
                user_id = %user_id,
                product_ref = %product,
                authoritative = %authoritative.id,
                others = ?others,
                "Several active subscriptions cover one product"
            );
        }
    }

    Projection {
        products: owners.into_keys().cloned().collect(),
        conflicts,
    }
}

impl SubscriptionManager {
    /// Recomputes one user's index entry from the store.
    pub(crate) async fn refresh_index(&self, user_id: &UserId) -> Result<(), BillingError> {
        let _guard = self.locks.acquire(index_lock(user_id)).await;
        let subscriptions = self.list_user_subscriptions(user_id).await?;
        let projection = project(user_id, &subscriptions);
        self.index.replace(user_id, projection.products);
        Ok(())
    }

    /// Rebuilds the whole index from every stored subscription.
    pub async fn rebuild_index(&self) -> Result<IndexRebuildReport, BillingError> {
        let stored = self
            .records
            .load_all::<Subscription>(keys::SUBSCRIPTION_PREFIX)
            .await?;

        let mut by_user: BTreeMap<UserId, Vec<Subscription>> = BTreeMap::new();
        for (_, sub) in stored {
            by_user.entry(sub.user_id.clone()).or_default().push(sub);
        }

        let mut report = IndexRebuildReport::default();
        let mut seen: HashSet<UserId> = HashSet::new();
        for (user_id, subscriptions) in &by_user {
            let _guard = self.locks.acquire(index_lock(user_id)).await;
            let projection = project(user_id, subscriptions);
            report.users += 1;
            report.subscriptions += subscriptions.len();
            report.active_products += projection.products.len();
            report.conflicts += projection.conflicts;
            self.index.replace(user_id, projection.products);
            seen.insert(user_id.clone());
        }

        // Users whose subscriptions are gone.
        for user_id in self.index.users() {
            if !seen.contains(&user_id) {
                self.refresh_index(&user_id).await?;
            }
        }

        tracing::info!(
            users = report.users,
            subscriptions = report.subscriptions,
            active_products = report.active_products,
            conflicts = report.conflicts,
            "Active subscription index rebuilt"
        );
        Ok(report)
    }
}
