//! Minor-unit money arithmetic and tax rounding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ValidationError;

/// Largest difference tolerated between a stored total and its recomputation.
pub const ROUNDING_TOLERANCE: i64 = 1;

/// ISO 4217 currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValidationError> {
        let code = code.as_ref().trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                format!("'{}' is not a three-letter code", code),
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// Checks that a tax rate is a fraction in `[0, 1]`.
pub fn validate_tax_rate(rate: Decimal) -> Result<(), ValidationError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ValidationError::invalid_format(
            "tax_rate",
            format!("{} is outside [0, 1]", rate),
        ));
    }
    Ok(())
}

/// Computes tax on a minor-unit amount, rounding half away from zero.
pub fn compute_tax(taxable: i64, rate: Decimal) -> Result<i64, ValidationError> {
    validate_tax_rate(rate)?;
    Decimal::from(taxable)
        .checked_mul(rate)
        .map(|tax| tax.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|tax| tax.to_i64())
        .ok_or_else(|| ValidationError::invalid_format("tax", "amount overflow"))
}

/// Multiplies a unit price by a quantity without overflowing.
pub fn extend_price(unit_price: i64, quantity: u32) -> Result<i64, ValidationError> {
    unit_price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| ValidationError::invalid_format("subtotal", "amount overflow"))
}

/// Returns true when two minor-unit amounts agree within rounding tolerance.
pub fn within_tolerance(a: i64, b: i64) -> bool {
    (a - b).abs() <= ROUNDING_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn rate(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn currency_is_normalized_to_upper_case() {
        assert_eq!(Currency::new("eur").unwrap().as_str(), "EUR");
    }

    #[test]
    fn currency_rejects_bad_codes() {
        assert!(Currency::new("EURO").is_err());
        assert!(Currency::new("E1R").is_err());
        assert!(Currency::new("").is_err());
    }

    #[test]
    fn ten_percent_of_one_thousand_is_one_hundred() {
        assert_eq!(compute_tax(1000, rate("0.1")).unwrap(), 100);
    }

    #[test]
    fn tax_rounds_half_away_from_zero() {
        // 125 * 0.1 = 12.5
        assert_eq!(compute_tax(125, rate("0.1")).unwrap(), 13);
        // 124 * 0.1 = 12.4
        assert_eq!(compute_tax(124, rate("0.1")).unwrap(), 12);
    }

    #[test]
    fn tax_rate_outside_unit_interval_is_rejected() {
        assert!(compute_tax(100, rate("1.5")).is_err());
        assert!(compute_tax(100, rate("-0.1")).is_err());
    }

    #[test]
    fn extend_price_detects_overflow() {
        assert_eq!(extend_price(250, 4).unwrap(), 1000);
        assert!(extend_price(i64::MAX, 2).is_err());
    }

    #[test]
    fn tolerance_is_one_minor_unit() {
        assert!(within_tolerance(1100, 1101));
        assert!(!within_tolerance(1100, 1102));
    }
}
