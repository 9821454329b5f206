//! Typed decoding of inbound gateway events.
//!
//! Payloads are decoded in two steps: the common envelope, then a body
//! whose shape is fixed by the event type. Unknown types decode to
//! [`EventBody::Unknown`]; a known type with a body that does not match is
//! rejected.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::payment::{Payment, PaymentStatus};
use super::subscription::SubscriptionStatus;
use super::webhook_errors::WebhookError;
use crate::domain::foundation::{ProductId, SubscriptionId, Timestamp, UserId};

pub const EVENT_PAYMENT: &str = "payment";
pub const EVENT_ADJUSTMENT: &str = "adjustment";
pub const EVENT_REFUND: &str = "refund";
pub const EVENT_SUBSCRIPTION: &str = "subscription";
pub const EVENT_SUBSCRIPTION_CANCELLED: &str = "subscription_cancelled";

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    #[serde(default)]
    data: serde_json::Value,
}

/// Refund or adjustment reported by the gateway for one transaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefundNotice {
    pub gateway_transaction_id: String,
    /// Refunded amount in minor units, when items are not named.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub line_item_ids: Vec<String>,
    /// Explicit status override carried by adjustment events.
    #[serde(default)]
    pub status: Option<PaymentStatus>,
}

/// Subscription state as the gateway reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionNotice {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub customer_ref: String,
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub product_refs: Vec<ProductId>,
}

/// Decoded body of a gateway event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Payment(Payment),
    Refund(RefundNotice),
    Subscription {
        notice: SubscriptionNotice,
        status: SubscriptionStatus,
    },
    Unknown,
}

/// A verified, decoded gateway event.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    /// When the gateway produced the event; orders events per entity.
    pub created: Timestamp,
    pub body: EventBody,
}

impl GatewayEvent {
    /// Decodes a raw payload into a typed event.
    pub fn decode(payload: &[u8]) -> Result<Self, WebhookError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        if envelope.id.trim().is_empty() {
            return Err(WebhookError::MalformedPayload("empty event id".to_string()));
        }
        let created = Timestamp::from_unix_secs(envelope.created)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let body = match envelope.event_type.as_str() {
            EVENT_PAYMENT => EventBody::Payment(body_of(envelope.data)?),
            EVENT_ADJUSTMENT | EVENT_REFUND => {
                let notice: RefundNotice = body_of(envelope.data)?;
                validate_refund(&notice)?;
                EventBody::Refund(notice)
            }
            EVENT_SUBSCRIPTION => {
                let notice: SubscriptionNotice = body_of(envelope.data)?;
                let status = notice.status.ok_or_else(|| {
                    WebhookError::MalformedPayload("missing field `status`".to_string())
                })?;
                EventBody::Subscription { notice, status }
            }
            EVENT_SUBSCRIPTION_CANCELLED => EventBody::Subscription {
                notice: body_of(envelope.data)?,
                status: SubscriptionStatus::Cancelled,
            },
            _ => EventBody::Unknown,
        };

        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            created,
            body,
        })
    }

    /// Key identifying this delivery for deduplication.
    pub fn dedup_key(&self) -> String {
        format!("webhook_event:{}:{}", self.event_type, self.id)
    }
}

fn body_of<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, WebhookError> {
    serde_json::from_value(data).map_err(|e| WebhookError::MalformedPayload(e.to_string()))
}

fn validate_refund(notice: &RefundNotice) -> Result<(), WebhookError> {
    if notice.gateway_transaction_id.trim().is_empty() {
        return Err(WebhookError::MalformedPayload(
            "empty gateway_transaction_id".to_string(),
        ));
    }
    match notice.amount {
        Some(amount) if amount < 0 => Err(WebhookError::MalformedPayload(format!(
            "negative refund amount {}",
            amount
        ))),
        None if notice.line_item_ids.is_empty() && notice.status.is_none() => Err(
            WebhookError::MalformedPayload("refund names neither amount nor items".to_string()),
        ),
        _ => Ok(()),
    }
}
