//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine)
//! - `billing` - Products, payments, line items, subscriptions and gateway events

pub mod billing;
pub mod foundation;
