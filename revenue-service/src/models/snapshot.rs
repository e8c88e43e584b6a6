//! Aggregation results.

use super::{Money, Provider};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Raw subscription records kept per provider for diagnostics.
pub const SUBSCRIPTION_SAMPLE_SIZE: usize = 3;
/// Raw payment records kept per provider for diagnostics.
pub const PAYMENT_SAMPLE_SIZE: usize = 5;

/// Why a record did not contribute to a total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InactiveStatus,
    MalformedRecord,
    DetailUnavailable,
    PlanUnresolved,
    NonNormalizableInterval,
    MissingRecurringPrice,
    NotSucceeded,
    NonPositiveAmount,
    UnsupportedCurrency,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InactiveStatus => "inactive_status",
            SkipReason::MalformedRecord => "malformed_record",
            SkipReason::DetailUnavailable => "detail_unavailable",
            SkipReason::PlanUnresolved => "plan_unresolved",
            SkipReason::NonNormalizableInterval => "non_normalizable_interval",
            SkipReason::MissingRecurringPrice => "missing_recurring_price",
            SkipReason::NotSucceeded => "not_succeeded",
            SkipReason::NonPositiveAmount => "non_positive_amount",
            SkipReason::UnsupportedCurrency => "unsupported_currency",
        }
    }
}

/// Pages fetched and items yielded by one pagination walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageStats {
    pub pages: u32,
    pub items_seen: u64,
}

/// How much of what was seen actually contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub subscriptions_contributing: u64,
    pub payments_admitted: u64,
    /// Subscriptions, charges and payments that were skipped, by reason.
    pub skipped: BTreeMap<SkipReason, u64>,
}

impl Coverage {
    pub fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

/// One provider's share of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderMetrics {
    pub provider: Provider,
    pub mrr: Money,
    pub revenue_all_time: Money,
    pub revenue_month_to_date: Money,
    pub subscription_sample: Vec<serde_json::Value>,
    pub payment_sample: Vec<serde_json::Value>,
    pub subscription_pages: PageStats,
    pub payment_pages: PageStats,
    pub coverage: Coverage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub month_start: DateTime<Utc>,
    pub stripe: ProviderMetrics,
    pub paypal: ProviderMetrics,
    pub total_mrr: Money,
}

impl Snapshot {
    pub fn merge(
        month_start: DateTime<Utc>,
        stripe: ProviderMetrics,
        paypal: ProviderMetrics,
    ) -> Self {
        let total_mrr = stripe.mrr + paypal.mrr;
        Self {
            month_start,
            stripe,
            paypal,
            total_mrr,
        }
    }
}

/// Keep the first `limit` raw records.
pub fn push_sample(sample: &mut Vec<serde_json::Value>, limit: usize, raw: &serde_json::Value) {
    if sample.len() < limit {
        sample.push(raw.clone());
    }
}
