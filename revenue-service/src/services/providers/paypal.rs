//! PayPal adapter.
//!
//! The subscription listing only yields ids, so pricing a subscription takes
//! a detail call plus a plan call. Those fan out with bounded concurrency and
//! plans are memoized for the run. Revenue comes from the transaction report,
//! queried one calendar month at a time.

use super::{is_usd, read_json, ProviderError, RevenueProvider, RunContext, Tally};
use crate::models::{
    signed_cents_from_decimal_str, BillingInterval, IntervalUnit, Money, PageStats, PaymentEvent,
    PlanMeta, Provider, ProviderMetrics, SkipReason,
};
use crate::services::normalizer::normalize;
use crate::services::pagination::{Cursor, CursorMode, Page, PaginationWalker};
use crate::services::plan_cache::{PlanMetadataCache, PlanUnresolved};
use crate::services::revenue_window::{
    month_ranges, trailing_months_start, RevenueWindowAggregator,
};
use crate::services::secrets::{SecretProvider, PAYPAL_CLIENT_ID, PAYPAL_CLIENT_SECRET};
use crate::services::throttle::OutboundThrottle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const TOKEN_ENDPOINT: &str = "oauth2_token";
const SUBSCRIPTIONS_ENDPOINT: &str = "subscriptions";
const SUBSCRIPTION_DETAIL_ENDPOINT: &str = "subscription_detail";
const PLANS_ENDPOINT: &str = "plans";
const TRANSACTIONS_ENDPOINT: &str = "transactions";

const REPORT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const SUCCESS_STATUS: &str = "S";

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub api_base_url: String,
    pub page_size: u32,
    pub report_page_size: u32,
    /// Earliest instant the transaction report is queried from. When unset
    /// the report covers the trailing `history_months` calendar months.
    pub history_start: Option<DateTime<Utc>>,
    pub history_months: u32,
    pub fanout_concurrency: usize,
    /// Outbound requests per second; 0 disables pacing.
    pub requests_per_second: u32,
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api-m.paypal.com".to_string(),
            page_size: 20,
            report_page_size: 500,
            history_start: None,
            history_months: 36,
            fanout_concurrency: 8,
            requests_per_second: 10,
        }
    }
}

/// Only `ACTIVE` subscriptions bill. `APPROVAL_PENDING`, `APPROVED`,
/// `SUSPENDED`, `CANCELLED` and `EXPIRED` do not count toward MRR.
pub fn is_financially_relevant(status: &str) -> bool {
    status.eq_ignore_ascii_case("ACTIVE")
}

/// Source of bearer tokens for PayPal calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<Secret<String>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth client-credentials grant against `/v1/oauth2/token`.
pub struct PayPalOAuth {
    http: Client,
    api_base_url: String,
    secrets: Arc<dyn SecretProvider>,
}

impl PayPalOAuth {
    pub fn new(http: Client, api_base_url: String, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            http,
            api_base_url,
            secrets,
        }
    }

    fn credential(&self, name: &str) -> Result<Secret<String>, ProviderError> {
        self.secrets
            .secret(name)
            .ok_or_else(|| ProviderError::MissingCredential(name.to_string()))
    }
}

#[async_trait]
impl TokenSource for PayPalOAuth {
    async fn access_token(&self) -> Result<Secret<String>, ProviderError> {
        let client_id = self.credential(PAYPAL_CLIENT_ID)?;
        let client_secret = self.credential(PAYPAL_CLIENT_SECRET)?;

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base_url))
            .basic_auth(client_id.expose_secret(), Some(client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await;

        let body = read_json(Provider::Paypal, TOKEN_ENDPOINT, response).await?;
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| ProviderError::malformed(TOKEN_ENDPOINT, e.to_string()))?;

        tracing::debug!("Acquired PayPal access token");
        Ok(Secret::new(token.access_token))
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
}

/// PayPal omits the collection key when it is empty but always sends the
/// totals, so a body carrying neither is not a listing.
#[derive(Debug, Deserialize)]
struct SubscriptionList {
    subscriptions: Option<Vec<Value>>,
    total_items: Option<u64>,
    total_pages: Option<u32>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionDetail {
    status: String,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    quantity: Option<Quantity>,
    #[serde(default)]
    subscriber: Option<Subscriber>,
}

/// PayPal sends quantities as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Quantity {
    Text(String),
    Number(u64),
}

impl Quantity {
    fn value(&self) -> Option<u64> {
        match self {
            Quantity::Text(s) => s.trim().parse().ok(),
            Quantity::Number(n) => Some(*n),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Subscriber {
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    name: Option<SubscriberName>,
}

#[derive(Debug, Deserialize)]
struct SubscriberName {
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
}

impl Subscriber {
    fn label(&self) -> Option<String> {
        if let Some(email) = &self.email_address {
            return Some(email.clone());
        }
        let name = self.name.as_ref()?;
        let parts: Vec<&str> = [name.given_name.as_deref(), name.surname.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Deserialize)]
struct Plan {
    #[serde(default)]
    billing_cycles: Vec<BillingCycle>,
}

#[derive(Debug, Deserialize)]
struct BillingCycle {
    tenure_type: String,
    frequency: Frequency,
    #[serde(default)]
    pricing_scheme: Option<PricingScheme>,
}

#[derive(Debug, Deserialize)]
struct Frequency {
    interval_unit: String,
    #[serde(default)]
    interval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PricingScheme {
    #[serde(default)]
    fixed_price: Option<MoneyValue>,
}

#[derive(Debug, Deserialize)]
struct MoneyValue {
    value: String,
    #[serde(default)]
    currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionReport {
    transaction_details: Option<Vec<Value>>,
    total_items: Option<u64>,
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TransactionDetail {
    transaction_info: TransactionInfo,
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    transaction_id: String,
    #[serde(default)]
    transaction_status: Option<String>,
    transaction_amount: MoneyValue,
    transaction_initiation_date: String,
}

/// Result of pricing one listed subscription.
enum Priced {
    Contributes(Money),
    Skipped(String, SkipReason),
}

/// Adapter over PayPal's REST API.
pub struct PayPalAdapter {
    http: Client,
    config: PayPalConfig,
    tokens: Arc<dyn TokenSource>,
    throttle: OutboundThrottle,
}

impl PayPalAdapter {
    pub fn new(http: Client, config: PayPalConfig, secrets: Arc<dyn SecretProvider>) -> Self {
        let tokens = Arc::new(PayPalOAuth::new(
            http.clone(),
            config.api_base_url.clone(),
            secrets,
        ));
        Self::with_token_source(http, config, tokens)
    }

    pub fn with_token_source(
        http: Client,
        config: PayPalConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let throttle = OutboundThrottle::per_second(config.requests_per_second);
        Self {
            http,
            config,
            tokens,
            throttle,
        }
    }

    async fn get_json(
        &self,
        run: &RunContext,
        token: &Secret<String>,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ProviderError> {
        run.cancellable(self.throttle.acquire()).await?;

        let url = format!("{}{}", self.config.api_base_url, path);
        run.guard(async {
            let response = self
                .http
                .get(&url)
                .bearer_auth(token.expose_secret())
                .query(query)
                .send()
                .await;
            read_json(Provider::Paypal, endpoint, response).await
        })
        .await
    }

    async fn subscription_page(
        &self,
        run: &RunContext,
        token: &Secret<String>,
        cursor: Cursor,
    ) -> Result<Page<Value>, ProviderError> {
        let page = page_number(&cursor);
        let query = [
            ("page", page.to_string()),
            ("page_size", self.config.page_size.max(1).to_string()),
        ];
        let body = self
            .get_json(run, token, SUBSCRIPTIONS_ENDPOINT, "/v1/billing/subscriptions", &query)
            .await?;
        let list: SubscriptionList = serde_json::from_value(body)
            .map_err(|e| ProviderError::malformed(SUBSCRIPTIONS_ENDPOINT, e.to_string()))?;
        let items = listing_items(
            SUBSCRIPTIONS_ENDPOINT,
            list.subscriptions,
            list.total_items,
            list.total_pages,
        )?;

        // A reported page count bounds the walk even when a next link is present.
        let has_more = match list.total_pages {
            Some(total) => total > page,
            None => list.links.iter().any(|link| link.rel == "next"),
        };
        Ok(Page { items, has_more })
    }

    /// Walk the listing and return the ids worth pricing. Statuses present
    /// in the listing are honored so inactive subscriptions skip the detail
    /// call.
    async fn list_subscription_ids(
        &self,
        run: &RunContext,
        token: &Secret<String>,
        tally: &mut Tally,
    ) -> Result<(Vec<String>, PageStats), ProviderError> {
        let mut walker = PaginationWalker::new(CursorMode::PageNumber, |cursor| {
            self.subscription_page(run, token, cursor)
        });

        let mut ids = Vec::new();
        while let Some(raw) = walker.next().await? {
            tally.sample_subscription(&raw);

            let Some(id) = raw.get("id").and_then(Value::as_str) else {
                tally.skip(SkipReason::MalformedRecord, None);
                continue;
            };
            match raw.get("status").and_then(Value::as_str) {
                Some(status) if !is_financially_relevant(status) => {
                    tally.skip(SkipReason::InactiveStatus, Some(id));
                }
                _ => ids.push(id.to_string()),
            }
        }

        Ok((ids, walker.stats()))
    }

    async fn fetch_plan(
        &self,
        run: &RunContext,
        token: &Secret<String>,
        plan_id: String,
    ) -> Result<PlanMeta, PlanUnresolved> {
        let path = format!("/v1/billing/plans/{}", plan_id);
        let body = self
            .get_json(run, token, PLANS_ENDPOINT, &path, &[])
            .await
            .map_err(|e| PlanUnresolved::new(&plan_id, e.to_string()))?;
        let plan: Plan = serde_json::from_value(body)
            .map_err(|e| PlanUnresolved::new(&plan_id, e.to_string()))?;
        plan_meta(plan_id, plan)
    }

    async fn price_subscription(
        &self,
        run: &RunContext,
        token: &Secret<String>,
        plans: &PlanMetadataCache,
        id: String,
    ) -> Result<Priced, ProviderError> {
        let path = format!("/v1/billing/subscriptions/{}", id);
        let body = match self
            .get_json(run, token, SUBSCRIPTION_DETAIL_ENDPOINT, &path, &[])
            .await
        {
            Ok(body) => body,
            Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
            Err(e) => {
                tracing::warn!(subscription_id = %id, error = %e, "PayPal subscription detail unavailable");
                return Ok(Priced::Skipped(id, SkipReason::DetailUnavailable));
            }
        };

        let Ok(detail) = serde_json::from_value::<SubscriptionDetail>(body) else {
            return Ok(Priced::Skipped(id, SkipReason::MalformedRecord));
        };
        if !is_financially_relevant(&detail.status) {
            return Ok(Priced::Skipped(id, SkipReason::InactiveStatus));
        }
        let Some(plan_id) = detail.plan_id.as_deref() else {
            return Ok(Priced::Skipped(id, SkipReason::MalformedRecord));
        };

        let plan = plans
            .resolve(plan_id, |plan_id| self.fetch_plan(run, token, plan_id))
            .await;
        if run.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(subscription_id = %id, error = %e, "PayPal plan unresolved");
                return Ok(Priced::Skipped(id, SkipReason::PlanUnresolved));
            }
        };

        let quantity = detail
            .quantity
            .as_ref()
            .and_then(Quantity::value)
            .unwrap_or(1)
            .max(1);

        match normalize(plan.amount, &plan.interval, quantity) {
            Ok(monthly) => {
                let customer = detail.subscriber.as_ref().and_then(Subscriber::label);
                tracing::trace!(
                    subscription_id = %id,
                    plan_id = %plan.plan_id,
                    customer = customer.as_deref().unwrap_or("-"),
                    monthly_cents = monthly.cents(),
                    "Priced PayPal subscription"
                );
                Ok(Priced::Contributes(monthly))
            }
            Err(e) => {
                tracing::warn!(subscription_id = %id, error = %e, "PayPal subscription not normalizable");
                Ok(Priced::Skipped(id, SkipReason::NonNormalizableInterval))
            }
        }
    }

    async fn transaction_page(
        &self,
        run: &RunContext,
        token: &Secret<String>,
        range: (DateTime<Utc>, DateTime<Utc>),
        cursor: Cursor,
    ) -> Result<Page<Value>, ProviderError> {
        let page = page_number(&cursor);
        let query = [
            ("start_date", range.0.format(REPORT_DATE_FORMAT).to_string()),
            ("end_date", range.1.format(REPORT_DATE_FORMAT).to_string()),
            ("fields", "transaction_info".to_string()),
            ("page", page.to_string()),
            ("page_size", self.config.report_page_size.max(1).to_string()),
        ];
        let body = self
            .get_json(run, token, TRANSACTIONS_ENDPOINT, "/v1/reporting/transactions", &query)
            .await?;
        let report: TransactionReport = serde_json::from_value(body)
            .map_err(|e| ProviderError::malformed(TRANSACTIONS_ENDPOINT, e.to_string()))?;
        let items = listing_items(
            TRANSACTIONS_ENDPOINT,
            report.transaction_details,
            report.total_items,
            report.total_pages,
        )?;

        Ok(Page {
            items,
            has_more: report.total_pages.is_some_and(|total| total > page),
        })
    }

    async fn transaction_pass(
        &self,
        run: &RunContext,
        token: &Secret<String>,
        tally: &mut Tally,
        window: &mut RevenueWindowAggregator,
    ) -> Result<PageStats, ProviderError> {
        let mut totals = PageStats::default();

        let from = self
            .config
            .history_start
            .unwrap_or_else(|| trailing_months_start(run.now, self.config.history_months));

        for range in month_ranges(from, run.now) {
            let mut walker = PaginationWalker::new(CursorMode::PageNumber, |cursor| {
                self.transaction_page(run, token, range, cursor)
            });

            while let Some(raw) = walker.next().await? {
                tally.sample_payment(&raw);

                let detail = match serde_json::from_value::<TransactionDetail>(raw) {
                    Ok(detail) => detail,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unreadable PayPal transaction");
                        tally.skip(SkipReason::MalformedRecord, None);
                        continue;
                    }
                };
                let id = detail.transaction_info.transaction_id.clone();
                let event = match to_payment_event(detail.transaction_info) {
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

            let stats = walker.stats();
            tracing::debug!(
                start = %range.0,
                end = %range.1,
                pages = stats.pages,
                items_seen = stats.items_seen,
                "Read PayPal transaction range"
            );
            totals.pages += stats.pages;
            totals.items_seen += stats.items_seen;
        }

        Ok(totals)
    }
}

/// Items of a listing body. An absent collection is only an empty page when
/// the body reports its totals.
fn listing_items(
    endpoint: &str,
    items: Option<Vec<Value>>,
    total_items: Option<u64>,
    total_pages: Option<u32>,
) -> Result<Vec<Value>, ProviderError> {
    match items {
        Some(items) => Ok(items),
        None if total_items.is_some() || total_pages.is_some() => Ok(Vec::new()),
        None => Err(ProviderError::malformed(
            endpoint,
            "response is neither a page of items nor an empty listing",
        )),
    }
}

fn page_number(cursor: &Cursor) -> u32 {
    match cursor {
        Cursor::Page(n) => *n,
        _ => 1,
    }
}

/// Pricing comes from the plan's `REGULAR` billing cycle; trial cycles are
/// ignored.
fn plan_meta(plan_id: String, plan: Plan) -> Result<PlanMeta, PlanUnresolved> {
    let Some(cycle) = plan
        .billing_cycles
        .into_iter()
        .find(|cycle| cycle.tenure_type.eq_ignore_ascii_case("REGULAR"))
    else {
        return Err(PlanUnresolved::new(plan_id, "no REGULAR billing cycle"));
    };

    let Some(price) = cycle.pricing_scheme.and_then(|scheme| scheme.fixed_price) else {
        return Err(PlanUnresolved::new(plan_id, "no fixed price"));
    };
    if !is_usd(price.currency_code.as_deref()) {
        return Err(PlanUnresolved::new(
            plan_id,
            format!("unsupported currency {}", price.currency_code.unwrap_or_default()),
        ));
    }
    let amount = Money::from_decimal_str(&price.value)
        .map_err(|e| PlanUnresolved::new(&plan_id, e.to_string()))?;

    Ok(PlanMeta {
        plan_id,
        amount,
        interval: BillingInterval::new(
            IntervalUnit::from_string(&cycle.frequency.interval_unit),
            cycle.frequency.interval_count,
        ),
    })
}

/// PayPal reports use `+0000` offsets; RFC 3339 is accepted as well.
fn parse_report_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn to_payment_event(info: TransactionInfo) -> Result<PaymentEvent, SkipReason> {
    if !is_usd(info.transaction_amount.currency_code.as_deref()) {
        return Err(SkipReason::UnsupportedCurrency);
    }
    let cents = signed_cents_from_decimal_str(&info.transaction_amount.value)
        .map_err(|_| SkipReason::MalformedRecord)?;
    let amount = Money::from_cents(cents).map_err(|_| SkipReason::NonPositiveAmount)?;
    let occurred_at =
        parse_report_time(&info.transaction_initiation_date).ok_or(SkipReason::MalformedRecord)?;

    Ok(PaymentEvent {
        id: info.transaction_id,
        provider: Provider::Paypal,
        amount,
        occurred_at,
        succeeded: info.transaction_status.as_deref() == Some(SUCCESS_STATUS),
    })
}

#[async_trait]
impl RevenueProvider for PayPalAdapter {
    fn provider(&self) -> Provider {
        Provider::Paypal
    }

    #[tracing::instrument(skip_all, fields(provider = "paypal"))]
    async fn aggregate(&self, run: &RunContext) -> Result<ProviderMetrics, ProviderError> {
        let token = run.guard(self.tokens.access_token()).await?;
        let mut tally = Tally::new(Provider::Paypal);

        let (ids, subscription_pages) =
            self.list_subscription_ids(run, &token, &mut tally).await?;

        let plans = PlanMetadataCache::new();
        let priced: Vec<Priced> = stream::iter(ids)
            .map(|id| self.price_subscription(run, &token, &plans, id))
            .buffered(self.config.fanout_concurrency.max(1))
            .try_collect()
            .await?;

        for outcome in priced {
            match outcome {
                Priced::Contributes(monthly) => tally.contribute(monthly),
                Priced::Skipped(id, reason) => tally.skip(reason, Some(&id)),
            }
        }

        let mut window = RevenueWindowAggregator::new(run.month_start);
        let payment_pages = self
            .transaction_pass(run, &token, &mut tally, &mut window)
            .await?;

        if run.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let metrics = tally.finish(&window, subscription_pages, payment_pages);
        tracing::info!(
            mrr_cents = metrics.mrr.cents(),
            all_time_cents = metrics.revenue_all_time.cents(),
            mtd_cents = metrics.revenue_month_to_date.cents(),
            plans_fetched = plans.fetch_count(),
            subscriptions_seen = subscription_pages.items_seen,
            payments_seen = payment_pages.items_seen,
            "PayPal aggregation complete"
        );
        Ok(metrics)
    }
}
