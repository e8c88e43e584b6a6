//! Integer-cents money.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when a provider value cannot become [`Money`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("negative amount: {0}")]
    Negative(String),

    #[error("not a decimal amount: {0:?}")]
    NotANumber(String),

    #[error("amount has sub-cent precision: {0}")]
    SubCent(String),

    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

/// A non-negative count of USD cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Result<Self, MoneyError> {
        u64::try_from(cents)
            .map(Money)
            .map_err(|_| MoneyError::Negative(cents.to_string()))
    }

    pub const fn from_unsigned_cents(cents: u64) -> Self {
        Money(cents)
    }

    /// Parse a provider decimal string such as `"12.34"`.
    pub fn from_decimal_str(value: &str) -> Result<Self, MoneyError> {
        let cents = signed_cents_from_decimal_str(value)?;
        Money::from_cents(cents).map_err(|_| MoneyError::Negative(value.to_string()))
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    /// Two-decimal fixed-point rendering, e.g. `"30.00"`.
    pub fn to_display_string(self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Parse a decimal string into signed cents. Transaction reports encode
/// refunds as negative values, so the sign is preserved here and callers
/// decide what to do with it.
pub fn signed_cents_from_decimal_str(value: &str) -> Result<i64, MoneyError> {
    let trimmed = value.trim();
    let decimal =
        Decimal::from_str(trimmed).map_err(|_| MoneyError::NotANumber(value.to_string()))?;

    let cents = decimal * Decimal::ONE_HUNDRED;
    if cents.fract() != Decimal::ZERO {
        return Err(MoneyError::SubCent(value.to_string()));
    }

    cents
        .to_i64()
        .ok_or_else(|| MoneyError::OutOfRange(value.to_string()))
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = self.saturating_add(rhs);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Money::saturating_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}
