//! Billing Reconciler - keeps a local mirror of products, payments and
//! subscriptions consistent with an asynchronous payment gateway.
//!
//! Webhooks may arrive late, twice, or while an API call is changing the
//! same entity. Every mutation runs inside a per-entity exclusive section,
//! gateway events are deduplicated by id and ordered by timestamp, and user
//! callbacks fire once per committed change.
//!
//! [`application::BillingEngine`] wires the components together over an
//! [`ports::EntityStore`] and a [`ports::GatewayClient`].

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
