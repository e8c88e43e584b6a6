//! Provider-neutral billing records.

use super::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Billing provider a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Paypal,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Paypal => "paypal",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of a billing interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalUnit {
    Month,
    Year,
    /// Day, week or anything else a provider sends; has no monthly equivalent.
    Other(String),
}

impl IntervalUnit {
    /// Case-insensitive, so Stripe's `month` and PayPal's `MONTH` agree.
    pub fn from_string(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "month" => IntervalUnit::Month,
            "year" => IntervalUnit::Year,
            other => IntervalUnit::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
            IntervalUnit::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingInterval {
    pub unit: IntervalUnit,
    count: u32,
}

impl BillingInterval {
    /// A zero or missing count is treated as 1.
    pub fn new(unit: IntervalUnit, count: Option<u32>) -> Self {
        Self {
            unit,
            count: count.unwrap_or(1).max(1),
        }
    }

    pub fn monthly() -> Self {
        Self::new(IntervalUnit::Month, Some(1))
    }

    pub fn yearly() -> Self {
        Self::new(IntervalUnit::Year, Some(1))
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// One priced line of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringCharge {
    /// `None` for free or metered prices.
    pub amount: Option<Money>,
    pub interval: BillingInterval,
    pub quantity: u64,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub provider: Provider,
    pub status: String,
    pub customer_label: Option<String>,
    pub charges: Vec<RecurringCharge>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub id: String,
    pub provider: Provider,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
    pub succeeded: bool,
}

/// Pricing resolved for a plan referenced by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanMeta {
    pub plan_id: String,
    pub amount: Money,
    pub interval: BillingInterval,
}
