//! Monthly-equivalent pricing.

use crate::models::{BillingInterval, IntervalUnit, Money};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("interval unit '{0}' has no monthly equivalent")]
    NonNormalizableInterval(String),
}

/// Convert a recurring price to its monthly-equivalent value in cents.
///
/// Yearly prices are spread over 12 months per interval count, rounding half
/// up to the nearest cent. Free prices are zero for any interval. Day and week
/// intervals are rejected rather than treated as monthly.
pub fn normalize(
    amount: Money,
    interval: &BillingInterval,
    quantity: u64,
) -> Result<Money, NormalizeError> {
    if amount.is_zero() {
        return Ok(Money::ZERO);
    }

    let months_per_unit: u128 = match &interval.unit {
        IntervalUnit::Month => 1,
        IntervalUnit::Year => 12,
        IntervalUnit::Other(unit) => {
            return Err(NormalizeError::NonNormalizableInterval(unit.clone()));
        }
    };

    let months = u128::from(interval.count().max(1)) * months_per_unit;
    let total = u128::from(amount.cents()) * u128::from(quantity.max(1));
    let monthly = (total + months / 2) / months;

    Ok(Money::from_unsigned_cents(
        u64::try_from(monthly).unwrap_or(u64::MAX),
    ))
}

/// Normalize a charge whose amount may be missing (metered or free prices).
pub fn normalize_optional(
    amount: Option<Money>,
    interval: &BillingInterval,
    quantity: u64,
) -> Result<Money, NormalizeError> {
    normalize(amount.unwrap_or(Money::ZERO), interval, quantity)
}
