//! Application layer - the engine's components and the state they share.
//!
//! Components mutate entities only inside the per-entity sections of
//! [`EntityLocks`] and report committed changes to the [`CallbackRegistry`]
//! after the lock is released.

mod callbacks;
mod catalog;
mod change;
mod engine;
mod ledger;
mod locks;
mod records;
mod subscriptions;
mod webhooks;

pub use callbacks::CallbackRegistry;
pub use catalog::{ProductCatalog, SyncReport};
pub use change::{Change, ChangeKind};
pub use engine::{BillingEngine, DeletedUserData, EngineSettings};
pub use ledger::{
    ChargeCommand, ChargeItem, Ledger, PaymentQuery, PaymentReconciliation, RecordOutcome,
};
pub use locks::{EntityGuard, EntityLocks};
pub use records::{keys, Records};
pub use subscriptions::{CancelSubscriptionResult, IndexRebuildReport, SubscriptionManager};
pub use webhooks::{ProcessedEvent, WebhookAck, WebhookDispatcher, WebhookOutcome};
