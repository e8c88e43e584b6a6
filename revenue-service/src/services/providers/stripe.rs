//! Stripe adapter.
//!
//! Stripe's subscription listing is rich enough to price every subscription
//! in one paginated walk (`expand[]=data.customer`), so there is no fan-out.
//! Revenue comes from a second walk over payment intents.

use super::{is_usd, read_json, ProviderError, RevenueProvider, RunContext, Tally};
use crate::models::{
    BillingInterval, IntervalUnit, Money, PageStats, PaymentEvent, Provider, ProviderMetrics,
    RecurringCharge, SkipReason, Subscription,
};
use crate::services::normalizer::{normalize_optional, NormalizeError};
use crate::services::pagination::{Cursor, CursorMode, Page, PaginationWalker};
use crate::services::revenue_window::RevenueWindowAggregator;
use crate::services::secrets::{SecretProvider, STRIPE_SECRET_KEY};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const SUBSCRIPTIONS_ENDPOINT: &str = "subscriptions";
const PAYMENT_INTENTS_ENDPOINT: &str = "payment_intents";

/// Stripe caps list pages at 100 items.
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base_url: String,
    pub page_size: u32,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.stripe.com".to_string(),
            page_size: MAX_PAGE_SIZE,
        }
    }
}

/// Statuses that still bill: `canceled`, `unpaid`, `incomplete`,
/// `incomplete_expired` and `paused` do not count toward MRR.
pub fn is_financially_relevant(status: &str) -> bool {
    matches!(status, "active" | "trialing" | "past_due")
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    data: Vec<Value>,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: String,
    #[serde(default)]
    customer: Option<CustomerRef>,
    items: StripeItems,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CustomerRef {
    Id(String),
    Expanded {
        id: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl CustomerRef {
    fn label(&self) -> String {
        match self {
            CustomerRef::Id(id) => id.clone(),
            CustomerRef::Expanded { id, email, name } => email
                .clone()
                .or_else(|| name.clone())
                .unwrap_or_else(|| id.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeItems {
    data: Vec<StripeItem>,
}

#[derive(Debug, Deserialize)]
struct StripeItem {
    #[serde(default)]
    price: Option<StripePrice>,
    #[serde(default)]
    quantity: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    #[serde(default)]
    unit_amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    recurring: Option<StripeRecurring>,
}

#[derive(Debug, Deserialize)]
struct StripeRecurring {
    interval: String,
    #[serde(default)]
    interval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    amount_received: i64,
    #[serde(default)]
    currency: Option<String>,
    created: i64,
}

/// Adapter over Stripe's REST API.
pub struct StripeAdapter {
    http: Client,
    config: StripeConfig,
    secrets: Arc<dyn SecretProvider>,
}

impl StripeAdapter {
    pub fn new(http: Client, config: StripeConfig, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            http,
            config,
            secrets,
        }
    }

    fn api_key(&self) -> Result<Secret<String>, ProviderError> {
        self.secrets
            .secret(STRIPE_SECRET_KEY)
            .ok_or_else(|| ProviderError::MissingCredential(STRIPE_SECRET_KEY.to_string()))
    }

    fn page_size(&self) -> u32 {
        self.config.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    async fn list_page(
        &self,
        endpoint: &'static str,
        extra: &[(&str, &str)],
        cursor: Cursor,
        api_key: &Secret<String>,
    ) -> Result<Page<Value>, ProviderError> {
        let url = format!("{}/v1/{}", self.config.api_base_url, endpoint);

        let mut query: Vec<(&str, String)> = vec![("limit", self.page_size().to_string())];
        query.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
        if let Cursor::After(id) = cursor {
            query.push(("starting_after", id));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(api_key.expose_secret())
            .query(&query)
            .send()
            .await;

        let body = read_json(Provider::Stripe, endpoint, response).await?;
        let envelope: ListEnvelope = serde_json::from_value(body)
            .map_err(|e| ProviderError::malformed(endpoint, e.to_string()))?;

        Ok(Page {
            items: envelope.data,
            has_more: envelope.has_more,
        })
    }

    async fn subscription_pass(
        &self,
        run: &RunContext,
        api_key: &Secret<String>,
        tally: &mut Tally,
    ) -> Result<PageStats, ProviderError> {
        let extra = [("status", "all"), ("expand[]", "data.customer")];
        let mut walker = PaginationWalker::new(CursorMode::LastItemId, |cursor| {
            run.guard(self.list_page(SUBSCRIPTIONS_ENDPOINT, &extra, cursor, api_key))
        });

        while let Some(raw) = walker.next().await? {
            tally.sample_subscription(&raw);

            let record: StripeSubscription = match serde_json::from_value(raw) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable Stripe subscription");
                    tally.skip(SkipReason::MalformedRecord, None);
                    continue;
                }
            };

            if !is_financially_relevant(&record.status) {
                tally.skip(SkipReason::InactiveStatus, Some(&record.id));
                continue;
            }

            let subscription = match to_subscription(record) {
                Ok(subscription) => subscription,
                Err((id, reason)) => {
                    tally.skip(reason, Some(&id));
                    continue;
                }
            };

            price_subscription(&subscription, tally);
        }

        Ok(walker.stats())
    }

    async fn payment_pass(
        &self,
        run: &RunContext,
        api_key: &Secret<String>,
        tally: &mut Tally,
        window: &mut RevenueWindowAggregator,
    ) -> Result<PageStats, ProviderError> {
        let mut walker = PaginationWalker::new(CursorMode::LastItemId, |cursor| {
            run.guard(self.list_page(PAYMENT_INTENTS_ENDPOINT, &[], cursor, api_key))
        });

        while let Some(raw) = walker.next().await? {
            tally.sample_payment(&raw);

            let intent: StripePaymentIntent = match serde_json::from_value(raw) {
                Ok(intent) => intent,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable Stripe payment intent");
                    tally.skip(SkipReason::MalformedRecord, None);
                    continue;
                }
            };
            let id = intent.id.clone();
            let event = match to_payment_event(intent) {
                Ok(event) => event,
                Err(reason) => {
                    tally.skip(reason, Some(&id));
                    continue;
                }
            };

            if window.admit(&event) {
                tally.admitted_payment();
            } else if !event.succeeded {
                tally.skip(SkipReason::NotSucceeded, Some(&event.id));
            } else {
                tally.skip(SkipReason::NonPositiveAmount, Some(&event.id));
            }
        }

        Ok(walker.stats())
    }
}

/// Validate a subscription record into the domain shape. Unsupported
/// currencies reject the whole subscription.
fn to_subscription(record: StripeSubscription) -> Result<Subscription, (String, SkipReason)> {
    let mut charges = Vec::with_capacity(record.items.data.len());

    for item in record.items.data {
        let Some(price) = item.price else {
            return Err((record.id, SkipReason::MissingRecurringPrice));
        };
        if !is_usd(price.currency.as_deref()) {
            return Err((record.id, SkipReason::UnsupportedCurrency));
        }
        let Some(recurring) = price.recurring else {
            return Err((record.id, SkipReason::MissingRecurringPrice));
        };

        let amount = match price.unit_amount.map(Money::from_cents).transpose() {
            Ok(amount) => amount,
            Err(_) => return Err((record.id, SkipReason::MalformedRecord)),
        };

        charges.push(RecurringCharge {
            amount,
            interval: BillingInterval::new(
                IntervalUnit::from_string(&recurring.interval),
                recurring.interval_count,
            ),
            quantity: item.quantity.unwrap_or(1).max(1),
        });
    }

    Ok(Subscription {
        id: record.id,
        provider: Provider::Stripe,
        status: record.status,
        customer_label: record.customer.as_ref().map(CustomerRef::label),
        charges,
    })
}

/// Add a subscription's normalized charges to the tally. A subscription
/// with any non-normalizable charge is skipped as a whole so MRR never
/// includes half of a subscription.
fn price_subscription(subscription: &Subscription, tally: &mut Tally) {
    let mut monthly = Money::ZERO;
    for charge in &subscription.charges {
        match normalize_optional(charge.amount, &charge.interval, charge.quantity) {
            Ok(value) => monthly += value,
            Err(NormalizeError::NonNormalizableInterval(unit)) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    unit = %unit,
                    "Stripe subscription billed on an interval without a monthly equivalent"
                );
                tally.skip(SkipReason::NonNormalizableInterval, Some(&subscription.id));
                return;
            }
        }
    }

    tracing::trace!(
        subscription_id = %subscription.id,
        customer = subscription.customer_label.as_deref().unwrap_or("-"),
        monthly_cents = monthly.cents(),
        "Priced Stripe subscription"
    );
    tally.contribute(monthly);
}

fn to_payment_event(intent: StripePaymentIntent) -> Result<PaymentEvent, SkipReason> {
    if !is_usd(intent.currency.as_deref()) {
        return Err(SkipReason::UnsupportedCurrency);
    }
    let amount =
        Money::from_cents(intent.amount_received).map_err(|_| SkipReason::NonPositiveAmount)?;
    let occurred_at: DateTime<Utc> = Utc
        .timestamp_opt(intent.created, 0)
        .single()
        .ok_or(SkipReason::MalformedRecord)?;

    Ok(PaymentEvent {
        id: intent.id,
        provider: Provider::Stripe,
        amount,
        occurred_at,
        succeeded: intent.status == "succeeded",
    })
}

#[async_trait]
impl RevenueProvider for StripeAdapter {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    #[tracing::instrument(skip_all, fields(provider = "stripe"))]
    async fn aggregate(&self, run: &RunContext) -> Result<ProviderMetrics, ProviderError> {
        let api_key = self.api_key()?;
        let mut tally = Tally::new(Provider::Stripe);
        let mut window = RevenueWindowAggregator::new(run.month_start);

        let subscription_pages = self.subscription_pass(run, &api_key, &mut tally).await?;
        let payment_pages = self
            .payment_pass(run, &api_key, &mut tally, &mut window)
            .await?;

        let metrics = tally.finish(&window, subscription_pages, payment_pages);
        tracing::info!(
            mrr_cents = metrics.mrr.cents(),
            all_time_cents = metrics.revenue_all_time.cents(),
            mtd_cents = metrics.revenue_month_to_date.cents(),
            subscription_pages = subscription_pages.pages,
            subscriptions_seen = subscription_pages.items_seen,
            payments_seen = payment_pages.items_seen,
            "Stripe aggregation complete"
        );
        Ok(metrics)
    }
}
