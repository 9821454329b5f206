//! Payment history queries.

use super::Ledger;
use crate::application::records::keys;
use crate::domain::billing::{Payment, PaymentStatus};
use crate::domain::foundation::{BillingError, PaymentId, Timestamp, UserId, ValidationError};

/// Filter for `get_payments`.
#[derive(Debug, Clone)]
pub struct PaymentQuery {
    pub user_id: UserId,
    /// Only payments at or after this instant.
    pub since: Option<Timestamp>,
    /// Page size; defaults to the configured limit and is capped by the maximum.
    pub limit: Option<usize>,
    pub status: Option<PaymentStatus>,
}

impl PaymentQuery {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            since: None,
            limit: None,
            status: None,
        }
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }
}

impl Ledger {
    /// Returns a user's payments, newest first.
    pub async fn get_payments(&self, query: PaymentQuery) -> Result<Vec<Payment>, BillingError> {
        let limit = match query.limit {
            Some(0) => {
                return Err(ValidationError::out_of_range(
                    "limit",
                    1,
                    self.config.max_page_limit as i64,
                    0,
                )
                .into())
            }
            Some(limit) => limit.min(self.config.max_page_limit),
            None => self.config.default_page_limit,
        };

        let ids = self
            .records
            .load_all::<PaymentId>(&keys::payment_user_prefix(&query.user_id))
            .await?;

        let mut payments = Vec::with_capacity(ids.len());
        for (_, payment_id) in ids {
            let Some(payment) = self.records.load::<Payment>(&keys::payment(&payment_id)).await?
            else {
                tracing::warn!(payment_id = %payment_id, "Payment index points at a missing record");
                continue;
            };
            let recent = query
                .since
                .map_or(true, |since| !payment.timestamp.is_before(&since));
            let status_matches = query.status.map_or(true, |status| payment.status == status);
            if recent && status_matches {
                payments.push(payment);
            }
        }

        payments.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        payments.truncate(limit);
        Ok(payments)
    }
}
