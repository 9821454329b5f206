//! Billing module - products, payments, subscriptions and gateway events.
//!
//! # State Machines
//!
//! - `LineItemStatus`: paid -> refunding -> refunded (rollback refunding -> paid)
//! - `PaymentStatus`: unknown -> open -> past_due -> paid
//! - `SubscriptionStatus`: active -> cancelling -> cancelled (cancelling -> active)
//!
//! # Webhooks
//!
//! `WebhookVerifier` authenticates deliveries and `GatewayEvent::decode`
//! turns an authenticated payload into a typed event.

mod gateway_event;
mod line_item;
pub mod money;
mod payment;
mod product;
mod subscription;
mod webhook_errors;
mod webhook_verifier;

pub use gateway_event::{
    EventBody, GatewayEvent, RefundNotice, SubscriptionNotice, EVENT_ADJUSTMENT, EVENT_PAYMENT,
    EVENT_REFUND, EVENT_SUBSCRIPTION, EVENT_SUBSCRIPTION_CANCELLED,
};
pub use line_item::{LineItem, LineItemStatus};
pub use money::Currency;
pub use payment::{BillingDetails, MergeOutcome, Payment, PaymentStatus};
pub use product::{Frequency, Product, TaxCategory, Trial};
pub use subscription::{CancelMode, Subscription, SubscriptionStatus};
pub use webhook_errors::WebhookError;
pub use webhook_verifier::{
    compute_signature, signature_header, SignatureHeader, WebhookVerifier, DEFAULT_TOLERANCE_SECS,
};

#[cfg(test)]
pub(crate) use payment::fixtures;
