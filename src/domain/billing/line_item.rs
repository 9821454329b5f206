//! Payment line items and their refund state machine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::{compute_tax, extend_price, validate_tax_rate, within_tolerance};
use crate::domain::foundation::{ProductId, StateMachine, ValidationError};

/// Refund state of a single line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    Paid,
    Refunding,
    Refunded,
}

impl LineItemStatus {
    /// Position along paid -> refunding -> refunded.
    pub fn progress(&self) -> u8 {
        match self {
            LineItemStatus::Paid => 0,
            LineItemStatus::Refunding => 1,
            LineItemStatus::Refunded => 2,
        }
    }
}

impl StateMachine for LineItemStatus {
    fn valid_transitions(&self) -> Vec<Self> {
        use LineItemStatus::*;
        match self {
            // Paid -> Refunded is the gateway-initiated refund.
            Paid => vec![Refunding, Refunded],
            // Refunding -> Paid is the rollback after a failed remote refund.
            Refunding => vec![Refunded, Paid],
            Refunded => vec![],
        }
    }
}

/// One priced product within a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub product_ref: ProductId,
    pub quantity: u32,
    pub tax_rate: Decimal,
    pub tax: i64,
    #[serde(default)]
    pub discount: i64,
    pub subtotal: i64,
    pub total: i64,
    pub status: LineItemStatus,
}

impl LineItem {
    /// Prices a paid line item from a unit price.
    ///
    /// Tax applies to the discounted subtotal.
    pub fn priced(
        id: impl Into<String>,
        product_ref: ProductId,
        unit_price: i64,
        quantity: u32,
        tax_rate: Decimal,
        discount: i64,
    ) -> Result<Self, ValidationError> {
        if quantity == 0 {
            return Err(ValidationError::out_of_range("quantity", 1, i64::from(u32::MAX), 0));
        }
        let subtotal = extend_price(unit_price, quantity)?;
        if discount < 0 || discount > subtotal {
            return Err(ValidationError::out_of_range("discount", 0, subtotal, discount));
        }
        let tax = compute_tax(subtotal - discount, tax_rate)?;

        let item = Self {
            id: id.into(),
            product_ref,
            quantity,
            tax_rate,
            tax,
            discount,
            subtotal,
            total: subtotal + tax - discount,
            status: LineItemStatus::Paid,
        };
        item.validate()?;
        Ok(item)
    }

    /// `subtotal + tax - discount`.
    pub fn expected_total(&self) -> i64 {
        self.subtotal + self.tax - self.discount
    }

    pub fn is_consistent(&self) -> bool {
        within_tolerance(self.total, self.expected_total())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::empty_field("line_item.id"));
        }
        if self.quantity == 0 {
            return Err(ValidationError::out_of_range("quantity", 1, i64::from(u32::MAX), 0));
        }
        validate_tax_rate(self.tax_rate)?;
        for (field, value) in [
            ("subtotal", self.subtotal),
            ("tax", self.tax),
            ("discount", self.discount),
            ("total", self.total),
        ] {
            if value < 0 {
                return Err(ValidationError::out_of_range(field, 0, i64::MAX, value));
            }
        }
        if !self.is_consistent() {
            return Err(ValidationError::invalid_format(
                "total",
                format!(
                    "line item '{}' total {} does not equal subtotal + tax - discount = {}",
                    self.id,
                    self.total,
                    self.expected_total()
                ),
            ));
        }
        Ok(())
    }

    /// paid -> refunding, for a locally requested refund.
    pub fn begin_refund(&mut self) -> Result<(), ValidationError> {
        if self.status != LineItemStatus::Paid {
            return Err(ValidationError::invalid_format(
                "line_item.status",
                format!("line item '{}' is {:?}, not paid", self.id, self.status),
            ));
        }
        self.status = self.status.transition_to(LineItemStatus::Refunding)?;
        Ok(())
    }

    /// refunding -> refunded, once the gateway confirmed the refund.
    pub fn complete_refund(&mut self) -> Result<(), ValidationError> {
        if self.status != LineItemStatus::Refunding {
            return Err(ValidationError::invalid_format(
                "line_item.status",
                format!("line item '{}' is {:?}, not refunding", self.id, self.status),
            ));
        }
        self.status = self.status.transition_to(LineItemStatus::Refunded)?;
        Ok(())
    }

    /// refunding -> paid, after the remote refund failed.
    pub fn rollback_refund(&mut self) {
        if self.status == LineItemStatus::Refunding {
            self.status = LineItemStatus::Paid;
        }
    }

    /// Marks the item refunded on the gateway's word.
    ///
    /// Returns false when the item was already refunded.
    pub fn force_refunded(&mut self) -> bool {
        if self.status == LineItemStatus::Refunded {
            return false;
        }
        self.status = LineItemStatus::Refunded;
        true
    }
}
