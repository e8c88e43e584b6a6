//! Billing provider adapters.
//!
//! Each adapter walks its provider's subscription and payment listings and
//! reduces them to one [`ProviderMetrics`]. Per-record anomalies are skipped
//! and counted; a failing listing call aborts the adapter.

pub mod paypal;
pub mod stripe;

use crate::models::{
    push_sample, Coverage, Money, PageStats, Provider, ProviderMetrics, SkipReason,
    PAYMENT_SAMPLE_SIZE, SUBSCRIPTION_SAMPLE_SIZE,
};
use crate::services::metrics::{record_provider_call, record_skip};
use crate::services::pagination::PaginationError;
use crate::services::revenue_window::{month_start_utc, RevenueWindowAggregator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use paypal::{PayPalAdapter, PayPalConfig, PayPalOAuth, TokenSource};
pub use stripe::{StripeAdapter, StripeConfig};

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Error type for provider operations. Every variant is fatal for the run.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited on {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("API error {status} on {endpoint}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("Pagination error: {0}")]
    Pagination(#[from] PaginationError),

    #[error("Cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn malformed(endpoint: &str, message: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

/// Per-run state shared by both adapters: the clock reading the run is based
/// on and the token that aborts it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub now: DateTime<Utc>,
    pub month_start: DateTime<Utc>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>, cancel: CancellationToken) -> Self {
        Self {
            now,
            month_start: month_start_utc(now),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a fallible external call, abandoning it if the run is cancelled.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
            result = fut => result,
        }
    }

    /// Like [`RunContext::guard`] for futures that cannot fail.
    pub async fn cancellable<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = T>,
    {
        self.guard(async { Ok(fut.await) }).await
    }
}

/// A billing provider that can be reduced to metrics.
#[async_trait]
pub trait RevenueProvider: Send + Sync {
    fn provider(&self) -> Provider;

    async fn aggregate(&self, run: &RunContext) -> Result<ProviderMetrics, ProviderError>;
}

/// Turn an HTTP response into JSON, mapping failure statuses to errors.
pub(crate) async fn read_json(
    provider: Provider,
    endpoint: &str,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<serde_json::Value, ProviderError> {
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            record_provider_call(provider.as_str(), endpoint, "error");
            return Err(ProviderError::Network(e.to_string()));
        }
    };

    let status = response.status();
    record_provider_call(provider.as_str(), endpoint, status.as_str());

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| ProviderError::malformed(endpoint, e.to_string()));
    }

    tracing::warn!(
        provider = %provider,
        endpoint,
        status = %status,
        "Provider call failed"
    );

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Unauthorized(format!("{} returned {}", endpoint, status))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after,
        },
        _ => ProviderError::Api {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message: truncate(&body, MAX_ERROR_BODY),
        },
    })
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

/// Whether a currency code is one the snapshot can sum. Missing codes are
/// assumed to be the account default.
pub(crate) fn is_usd(currency: Option<&str>) -> bool {
    currency.is_none_or(|c| c.eq_ignore_ascii_case("usd"))
}

/// Accumulates one adapter's totals, coverage and samples.
pub(crate) struct Tally {
    provider: Provider,
    mrr: Money,
    coverage: Coverage,
    subscription_sample: Vec<serde_json::Value>,
    payment_sample: Vec<serde_json::Value>,
}

impl Tally {
    pub(crate) fn new(provider: Provider) -> Self {
        Self {
            provider,
            mrr: Money::ZERO,
            coverage: Coverage::default(),
            subscription_sample: Vec::new(),
            payment_sample: Vec::new(),
        }
    }

    pub(crate) fn sample_subscription(&mut self, raw: &serde_json::Value) {
        push_sample(&mut self.subscription_sample, SUBSCRIPTION_SAMPLE_SIZE, raw);
    }

    pub(crate) fn sample_payment(&mut self, raw: &serde_json::Value) {
        push_sample(&mut self.payment_sample, PAYMENT_SAMPLE_SIZE, raw);
    }

    pub(crate) fn contribute(&mut self, monthly: Money) {
        self.mrr += monthly;
        self.coverage.subscriptions_contributing += 1;
    }

    pub(crate) fn admitted_payment(&mut self) {
        self.coverage.payments_admitted += 1;
    }

    pub(crate) fn skip(&mut self, reason: SkipReason, id: Option<&str>) {
        tracing::debug!(
            provider = %self.provider,
            id = id.unwrap_or("-"),
            reason = reason.as_str(),
            "Skipping record"
        );
        record_skip(self.provider.as_str(), reason.as_str());
        self.coverage.skip(reason);
    }

    pub(crate) fn finish(
        self,
        window: &RevenueWindowAggregator,
        subscription_pages: PageStats,
        payment_pages: PageStats,
    ) -> ProviderMetrics {
        ProviderMetrics {
            provider: self.provider,
            mrr: self.mrr,
            revenue_all_time: window.all_time(),
            revenue_month_to_date: window.month_to_date(),
            subscription_sample: self.subscription_sample,
            payment_sample: self.payment_sample,
            subscription_pages,
            payment_pages,
            coverage: self.coverage,
        }
    }
}
