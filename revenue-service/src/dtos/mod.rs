use crate::models::{Coverage, PageStats, ProviderMetrics, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query parameters for `GET /snapshot`.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub month_start: String,
    pub total_mrr_usd: String,
    pub providers: ProvidersResponse,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub stripe: ProviderResponse,
    pub paypal: ProviderResponse,
}

#[derive(Debug, Serialize)]
pub struct ProviderResponse {
    pub mrr_usd: String,
    pub all_time_revenue_usd: String,
    pub month_to_date_revenue_usd: String,
    pub subscriptions_sample: Vec<Value>,
    pub payments_sample: Vec<Value>,
    pub subscription_pages: PageStats,
    pub payment_pages: PageStats,
    pub coverage: Coverage,
}

impl From<ProviderMetrics> for ProviderResponse {
    fn from(metrics: ProviderMetrics) -> Self {
        Self {
            mrr_usd: metrics.mrr.to_display_string(),
            all_time_revenue_usd: metrics.revenue_all_time.to_display_string(),
            month_to_date_revenue_usd: metrics.revenue_month_to_date.to_display_string(),
            subscriptions_sample: metrics.subscription_sample,
            payments_sample: metrics.payment_sample,
            subscription_pages: metrics.subscription_pages,
            payment_pages: metrics.payment_pages,
            coverage: metrics.coverage,
        }
    }
}

impl From<Snapshot> for SnapshotResponse {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            month_start: snapshot
                .month_start
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
            total_mrr_usd: snapshot.total_mrr.to_display_string(),
            providers: ProvidersResponse {
                stripe: snapshot.stripe.into(),
                paypal: snapshot.paypal.into(),
            },
        }
    }
}
