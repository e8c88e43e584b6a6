//! Run-scoped plan pricing cache.

use crate::models::PlanMeta;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

/// A plan whose pricing could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("plan {plan_id} unresolved: {reason}")]
pub struct PlanUnresolved {
    pub plan_id: String,
    pub reason: String,
}

impl PlanUnresolved {
    pub fn new(plan_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            reason: reason.into(),
        }
    }
}

type Resolution = Result<PlanMeta, PlanUnresolved>;

/// Memoizes plan lookups for one aggregation run.
///
/// Each plan id is fetched at most once, whether the fetch succeeds or not.
/// Concurrent resolutions of the same id wait on the first one; the map shard
/// lock is released before the fetch starts.
#[derive(Default)]
pub struct PlanMetadataCache {
    entries: DashMap<String, Arc<OnceCell<Resolution>>>,
    fetches: AtomicUsize,
}

impl PlanMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve<F, Fut>(&self, plan_id: &str, fetch_plan: F) -> Resolution
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Resolution>,
    {
        let cell = self
            .entries
            .entry(plan_id.to_string())
            .or_default()
            .value()
            .clone();

        cell.get_or_init(|| async move {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(plan_id, "Fetching plan metadata");
            fetch_plan(plan_id.to_string()).await
        })
        .await
        .clone()
    }

    /// Number of external plan fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingInterval, Money};
    use futures::future::join_all;
    use std::time::Duration;

    fn plan(id: &str) -> PlanMeta {
        PlanMeta {
            plan_id: id.to_string(),
            amount: Money::from_unsigned_cents(1500),
            interval: BillingInterval::monthly(),
        }
    }

    #[tokio::test]
    async fn same_plan_is_fetched_once() {
        let cache = PlanMetadataCache::new();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..10 {
            let resolved = cache
                .resolve("P-1", |id| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(plan(&id))
                })
                .await;
            assert_eq!(resolved.unwrap().plan_id, "P-1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_resolutions_share_one_fetch() {
        let cache = PlanMetadataCache::new();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let resolutions = (0..8).map(|_| {
            cache.resolve("P-1", |id| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(plan(&id))
            })
        });
        let results = join_all(resolutions).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_cached_too() {
        let cache = PlanMetadataCache::new();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..3 {
            let resolved = cache
                .resolve("P-broken", |id| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PlanUnresolved::new(id, "no fixed price"))
                })
                .await;
            assert_eq!(
                resolved.unwrap_err(),
                PlanUnresolved::new("P-broken", "no fixed price")
            );
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_plans_fetch_separately() {
        let cache = PlanMetadataCache::new();
        for id in ["P-1", "P-2", "P-1", "P-3", "P-2"] {
            cache.resolve(id, |id| async move { Ok(plan(&id)) }).await.unwrap();
        }
        assert_eq!(cache.fetch_count(), 3);
        assert_eq!(cache.len(), 3);
    }
}
