//! Charging catalog products through the gateway.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::Ledger;
use crate::domain::billing::{BillingDetails, Currency, LineItem, Payment, PaymentStatus, TaxCategory};
use crate::domain::foundation::{
    BillingError, PaymentId, ProductId, Timestamp, UserId, ValidationError,
};
use crate::ports::{ChargeLine, ChargeRequest};

/// One product in a charge.
#[derive(Debug, Clone)]
pub struct ChargeItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Discount in minor units, taken off the line subtotal before tax.
    pub discount: i64,
}

impl ChargeItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            discount: 0,
        }
    }

    pub fn with_discount(mut self, discount: i64) -> Self {
        self.discount = discount;
        self
    }
}

/// Request to charge a customer for catalog products.
#[derive(Debug, Clone)]
pub struct ChargeCommand {
    pub user_id: UserId,
    pub customer_ref: String,
    pub items: Vec<ChargeItem>,
    /// Rate per tax category; `Exempt` is always zero.
    pub tax_rates: HashMap<TaxCategory, Decimal>,
    pub billing_details: BillingDetails,
    /// Forwarded to the gateway so the charge can be retried safely.
    pub idempotency_key: Option<String>,
}

impl Ledger {
    /// Charges catalog products and records the resulting payment.
    pub async fn charge(&self, command: ChargeCommand) -> Result<Payment, BillingError> {
        if command.items.is_empty() {
            return Err(ValidationError::empty_field("items").into());
        }
        if command.customer_ref.trim().is_empty() {
            return Err(ValidationError::empty_field("customer_ref").into());
        }

        let mut currency: Option<Currency> = None;
        let mut line_items = Vec::with_capacity(command.items.len());
        let mut lines = Vec::with_capacity(command.items.len());
        for (n, requested) in command.items.iter().enumerate() {
            let product = self.catalog.get_product(&requested.product_id).await?;
            let Some(gateway_ref) = product.gateway_ref.clone().filter(|_| product.is_purchasable())
            else {
                return Err(BillingError::validation(
                    "items",
                    format!("product '{}' cannot be purchased", product.id),
                ));
            };
            match &currency {
                Some(c) if c != &product.currency => {
                    return Err(BillingError::validation(
                        "items",
                        format!(
                            "product '{}' is priced in {}, not {}",
                            product.id,
                            product.currency.as_str(),
                            c.as_str()
                        ),
                    ))
                }
                Some(_) => {}
                None => currency = Some(product.currency.clone()),
            }

            let rate = tax_rate(&command.tax_rates, product.tax_category)?;
            let item = LineItem::priced(
                format!("li_{}", n + 1),
                product.id.clone(),
                product.price,
                requested.quantity,
                rate,
                requested.discount,
            )?;
            lines.push(ChargeLine {
                product_gateway_ref: gateway_ref,
                quantity: item.quantity,
                amount: item.total,
            });
            line_items.push(item);
        }
        let Some(currency) = currency else {
            return Err(ValidationError::empty_field("items").into());
        };

        let amount: i64 = line_items.iter().map(|item| item.total).sum();
        let receipt = self
            .gateway
            .charge(ChargeRequest {
                user_id: command.user_id.clone(),
                customer_ref: command.customer_ref.clone(),
                currency: currency.as_str().to_string(),
                amount,
                lines,
                idempotency_key: command.idempotency_key,
            })
            .await?;

        let timestamp =
            Timestamp::from_unix_secs(receipt.created).unwrap_or_else(|_| Timestamp::now());
        let payment = Payment {
            id: PaymentId::generate(),
            user_id: command.user_id,
            customer_ref: command.customer_ref,
            gateway_transaction_id: receipt.gateway_transaction_id.clone(),
            timestamp,
            status: PaymentStatus::Paid,
            currency,
            line_items,
            billing_details: command.billing_details,
            subscription_ref: None,
            last_event_at: None,
        };
        tracing::info!(
            gateway_transaction_id = %receipt.gateway_transaction_id,
            user_id = %payment.user_id,
            amount,
            "Charge accepted by gateway"
        );

        self.record_payment(payment).await?;
        // A webhook may have recorded the transaction first under another id.
        self.find_by_transaction(&receipt.gateway_transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment", &receipt.gateway_transaction_id))
    }
}

fn tax_rate(
    rates: &HashMap<TaxCategory, Decimal>,
    category: TaxCategory,
) -> Result<Decimal, BillingError> {
    if category == TaxCategory::Exempt {
        return Ok(Decimal::ZERO);
    }
    rates.get(&category).copied().ok_or_else(|| {
        BillingError::validation(
            "tax_rates",
            format!("no rate given for tax category {:?}", category),
        )
    })
}
