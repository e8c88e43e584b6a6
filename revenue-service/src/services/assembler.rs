//! Snapshot assembly.
//!
//! Runs both provider pipelines concurrently against one clock reading and
//! merges them. Either both succeed and a snapshot is produced, or the first
//! failure aborts the other and no snapshot is produced.

use crate::models::{Provider, ProviderMetrics, Snapshot};
use crate::services::metrics::record_snapshot_build;
use crate::services::providers::{ProviderError, RevenueProvider, RunContext};
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("{provider} aggregation failed: {source}")]
    Provider {
        provider: Provider,
        #[source]
        source: ProviderError,
    },

    #[error("snapshot not ready within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("snapshot build cancelled")]
    Cancelled,
}

impl AggregationError {
    fn outcome(&self) -> &'static str {
        match self {
            AggregationError::Provider { .. } => "provider_error",
            AggregationError::DeadlineExceeded(_) => "deadline_exceeded",
            AggregationError::Cancelled => "cancelled",
        }
    }
}

/// A provider's rate limit is passed through with its `Retry-After`; any
/// other provider failure is a bad gateway.
impl From<AggregationError> for AppError {
    fn from(err: AggregationError) -> Self {
        match &err {
            AggregationError::Provider {
                source: ProviderError::RateLimited { retry_after, .. },
                ..
            } => AppError::TooManyRequests(err.to_string(), *retry_after),
            AggregationError::Provider { .. } => AppError::BadGateway(err.to_string()),
            AggregationError::DeadlineExceeded(_) => AppError::GatewayTimeout(err.to_string()),
            AggregationError::Cancelled => AppError::ServiceUnavailable,
        }
    }
}

#[derive(Clone)]
pub struct SnapshotAssembler {
    stripe: Arc<dyn RevenueProvider>,
    paypal: Arc<dyn RevenueProvider>,
    default_deadline: Duration,
}

impl SnapshotAssembler {
    pub fn new(
        stripe: Arc<dyn RevenueProvider>,
        paypal: Arc<dyn RevenueProvider>,
        default_deadline: Duration,
    ) -> Self {
        Self {
            stripe,
            paypal,
            default_deadline,
        }
    }

    /// Build a snapshot for the current instant.
    pub async fn build(&self, deadline: Option<Duration>) -> Result<Snapshot, AggregationError> {
        self.build_at(Utc::now(), deadline, CancellationToken::new())
            .await
    }

    /// Build a snapshot as of `now`. Firing `cancel`, or running past the
    /// deadline, abandons every in-flight provider call.
    #[tracing::instrument(skip(self, cancel), fields(month_start = tracing::field::Empty))]
    pub async fn build_at(
        &self,
        now: DateTime<Utc>,
        deadline: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Snapshot, AggregationError> {
        let deadline = deadline.unwrap_or(self.default_deadline);
        let run = RunContext::new(now, cancel.child_token());
        tracing::Span::current().record("month_start", tracing::field::display(run.month_start));

        let started = Instant::now();
        let result = match tokio::time::timeout(deadline, self.run_providers(&run)).await {
            Ok(result) => result,
            Err(_) => {
                run.cancel_token().cancel();
                Err(AggregationError::DeadlineExceeded(deadline))
            }
        };
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(snapshot) => {
                record_snapshot_build("success", elapsed);
                tracing::info!(
                    total_mrr_cents = snapshot.total_mrr.cents(),
                    elapsed_secs = elapsed,
                    "Snapshot built"
                );
            }
            Err(e) => {
                record_snapshot_build(e.outcome(), elapsed);
                tracing::error!(error = %e, elapsed_secs = elapsed, "Snapshot build failed");
            }
        }
        result
    }

    async fn run_providers(&self, run: &RunContext) -> Result<Snapshot, AggregationError> {
        let stripe = self.aggregate(self.stripe.as_ref(), run);
        let paypal = self.aggregate(self.paypal.as_ref(), run);

        let (stripe, paypal) = tokio::try_join!(stripe, paypal)?;
        Ok(Snapshot::merge(run.month_start, stripe, paypal))
    }

    /// Run one provider. A failure cancels the run so the sibling pipeline
    /// stops issuing calls.
    async fn aggregate(
        &self,
        provider: &dyn RevenueProvider,
        run: &RunContext,
    ) -> Result<ProviderMetrics, AggregationError> {
        match provider.aggregate(run).await {
            Ok(metrics) => Ok(metrics),
            Err(ProviderError::Cancelled) => Err(AggregationError::Cancelled),
            Err(source) => {
                run.cancel_token().cancel();
                Err(AggregationError::Provider {
                    provider: provider.provider(),
                    source,
                })
            }
        }
    }
}
