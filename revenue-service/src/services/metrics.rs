use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static PROVIDER_CALLS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static ITEMS_SKIPPED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SNAPSHOT_BUILDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SNAPSHOT_BUILD_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    let registry = Registry::new();

    let provider_calls = IntCounterVec::new(
        Opts::new(
            "revenue_provider_calls_total",
            "Calls made to billing provider APIs by endpoint and HTTP status",
        ),
        &["provider", "endpoint", "status"],
    )
    .expect("Failed to create revenue_provider_calls_total metric");

    let items_skipped = IntCounterVec::new(
        Opts::new(
            "revenue_items_skipped_total",
            "Provider records excluded from revenue totals, by reason",
        ),
        &["provider", "reason"],
    )
    .expect("Failed to create revenue_items_skipped_total metric");

    let snapshot_builds = IntCounterVec::new(
        Opts::new("revenue_snapshot_builds_total", "Snapshot builds by outcome"),
        &["outcome"],
    )
    .expect("Failed to create revenue_snapshot_builds_total metric");

    let snapshot_duration = HistogramVec::new(
        HistogramOpts::new(
            "revenue_snapshot_build_duration_seconds",
            "Wall-clock time to build a snapshot",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["outcome"],
    )
    .expect("Failed to create revenue_snapshot_build_duration_seconds metric");

    registry
        .register(Box::new(provider_calls.clone()))
        .expect("Failed to register revenue_provider_calls_total");
    registry
        .register(Box::new(items_skipped.clone()))
        .expect("Failed to register revenue_items_skipped_total");
    registry
        .register(Box::new(snapshot_builds.clone()))
        .expect("Failed to register revenue_snapshot_builds_total");
    registry
        .register(Box::new(snapshot_duration.clone()))
        .expect("Failed to register revenue_snapshot_build_duration_seconds");

    PROMETHEUS_REGISTRY
        .set(registry)
        .expect("Failed to set prometheus registry");
    PROVIDER_CALLS_TOTAL
        .set(provider_calls)
        .expect("Failed to set revenue_provider_calls_total");
    ITEMS_SKIPPED_TOTAL
        .set(items_skipped)
        .expect("Failed to set revenue_items_skipped_total");
    SNAPSHOT_BUILDS_TOTAL
        .set(snapshot_builds)
        .expect("Failed to set revenue_snapshot_builds_total");
    SNAPSHOT_BUILD_DURATION_SECONDS
        .set(snapshot_duration)
        .expect("Failed to set revenue_snapshot_build_duration_seconds");
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record one provider API call. `status` is the HTTP status or `error` for
/// transport failures.
pub fn record_provider_call(provider: &str, endpoint: &str, status: &str) {
    if let Some(counter) = PROVIDER_CALLS_TOTAL.get() {
        counter
            .with_label_values(&[provider, endpoint, status])
            .inc();
    }
}

pub fn record_skip(provider: &str, reason: &str) {
    if let Some(counter) = ITEMS_SKIPPED_TOTAL.get() {
        counter.with_label_values(&[provider, reason]).inc();
    }
}

pub fn record_snapshot_build(outcome: &str, seconds: f64) {
    if let Some(counter) = SNAPSHOT_BUILDS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = SNAPSHOT_BUILD_DURATION_SECONDS.get() {
        histogram.with_label_values(&[outcome]).observe(seconds);
    }
}
