//! Domain models for revenue-service.

mod billing;
mod money;
mod snapshot;

pub use billing::{
    BillingInterval, IntervalUnit, PaymentEvent, PlanMeta, Provider, RecurringCharge,
    Subscription,
};
pub use money::{signed_cents_from_decimal_str, Money, MoneyError};
pub use snapshot::{
    push_sample, Coverage, PageStats, ProviderMetrics, SkipReason, Snapshot,
    PAYMENT_SAMPLE_SIZE, SUBSCRIPTION_SAMPLE_SIZE,
};
