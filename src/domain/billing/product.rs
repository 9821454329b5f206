//! Catalog product definitions.

use serde::{Deserialize, Serialize};

use super::money::Currency;
use crate::domain::foundation::{ProductId, ValidationError};

/// Billing period unit for recurring products and trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Day,
    Week,
    Month,
    Year,
}

/// Tax treatment applied when a product is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxCategory {
    #[default]
    Standard,
    Reduced,
    DigitalServices,
    Exempt,
}

/// Free trial attached to a recurring product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub frequency: Frequency,
    pub interval: u32,
}

/// A purchasable product, or a parent grouping subscription plans.
///
/// A product with `plans` carries no meaningful price of its own; the plans
/// are what users buy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Price in minor units.
    #[serde(default)]
    pub price: i64,
    pub currency: Currency,
    #[serde(default)]
    pub tax_category: TaxCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial: Option<Trial>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<Product>,
    /// Identifier of this product in the gateway's catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,
}

impl Product {
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        price: i64,
        currency: Currency,
    ) -> Result<Self, ValidationError> {
        let product = Self {
            id,
            name: name.into(),
            price,
            currency,
            tax_category: TaxCategory::default(),
            frequency: None,
            interval: None,
            trial: None,
            plans: Vec::new(),
            gateway_ref: None,
        };
        product.validate()?;
        Ok(product)
    }

    /// Makes the product recurring every `interval` `frequency` units.
    pub fn recurring(mut self, frequency: Frequency, interval: u32) -> Self {
        self.frequency = Some(frequency);
        self.interval = Some(interval);
        self
    }

    pub fn with_plans(mut self, plans: Vec<Product>) -> Self {
        self.plans = plans;
        self
    }

    pub fn with_gateway_ref(mut self, gateway_ref: impl Into<String>) -> Self {
        self.gateway_ref = Some(gateway_ref.into());
        self
    }

    /// Validates this product and every nested plan.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::empty_field("name"));
        }
        if self.price < 0 {
            return Err(ValidationError::out_of_range("price", 0, i64::MAX, self.price));
        }
        match (self.frequency, self.interval) {
            (Some(_), Some(0)) => {
                return Err(ValidationError::out_of_range("interval", 1, i64::from(u32::MAX), 0))
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ValidationError::invalid_format(
                    "interval",
                    "frequency and interval must be set together",
                ))
            }
            _ => {}
        }
        if let Some(trial) = &self.trial {
            if self.frequency.is_none() {
                return Err(ValidationError::invalid_format(
                    "trial",
                    "only recurring products can have a trial",
                ));
            }
            if trial.interval == 0 {
                return Err(ValidationError::out_of_range("trial.interval", 1, i64::from(u32::MAX), 0));
            }
        }
        for plan in &self.plans {
            if !plan.plans.is_empty() {
                return Err(ValidationError::invalid_format(
                    "plans",
                    format!("plan '{}' cannot have plans of its own", plan.id),
                ));
            }
            plan.validate()?;
        }
        Ok(())
    }

    pub fn is_recurring(&self) -> bool {
        self.frequency.is_some()
    }

    pub fn has_plans(&self) -> bool {
        !self.plans.is_empty()
    }

    /// A product can be charged once it is a leaf with a gateway reference.
    pub fn is_purchasable(&self) -> bool {
        !self.has_plans() && self.gateway_ref.is_some()
    }

    /// Finds this product or one of its plans by id.
    pub fn find(&self, id: &ProductId) -> Option<&Product> {
        if &self.id == id {
            return Some(self);
        }
        self.plans.iter().find(|plan| &plan.id == id)
    }

    /// Finds this product or one of its plans by gateway reference.
    pub fn find_by_gateway_ref_mut(&mut self, gateway_ref: &str) -> Option<&mut Product> {
        if self.gateway_ref.as_deref() == Some(gateway_ref) {
            return Some(self);
        }
        self.plans
            .iter_mut()
            .find(|plan| plan.gateway_ref.as_deref() == Some(gateway_ref))
    }
}
