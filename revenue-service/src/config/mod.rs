use crate::services::{PayPalConfig, StripeConfig};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RevenueConfig {
    pub common: core_config::Config,
    pub stripe: StripeConfig,
    pub paypal: PayPalConfig,
    pub snapshot: SnapshotConfig,
    pub http_client: HttpClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// Deadline applied when a request does not ask for one.
    pub deadline_secs: u64,
    /// Upper bound for caller-supplied deadlines.
    pub max_deadline_secs: u64,
}

impl SnapshotConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Clamp a requested deadline to `[1, max_deadline_secs]`.
    pub fn clamp(&self, requested_secs: u64) -> Duration {
        Duration::from_secs(requested_secs.clamp(1, self.max_deadline_secs.max(1)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    pub timeout_secs: u64,
}

impl RevenueConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let stripe_defaults = StripeConfig::default();
        let paypal_defaults = PayPalConfig::default();

        let history_start = env::var("PAYPAL_HISTORY_START")
            .ok()
            .map(|value| parse_history_start(&value))
            .transpose()?;

        Ok(RevenueConfig {
            common: common_config,
            stripe: StripeConfig {
                api_base_url: get_env(
                    "STRIPE_API_BASE_URL",
                    Some(&stripe_defaults.api_base_url),
                    is_prod,
                )?,
                page_size: parse_env("STRIPE_PAGE_SIZE", stripe_defaults.page_size)?,
            },
            paypal: PayPalConfig {
                api_base_url: get_env(
                    "PAYPAL_API_BASE_URL",
                    Some(&paypal_defaults.api_base_url),
                    is_prod,
                )?,
                page_size: parse_env("PAYPAL_PAGE_SIZE", paypal_defaults.page_size)?,
                report_page_size: parse_env(
                    "PAYPAL_REPORT_PAGE_SIZE",
                    paypal_defaults.report_page_size,
                )?,
                history_start,
                history_months: parse_env("PAYPAL_HISTORY_MONTHS", paypal_defaults.history_months)?,
                fanout_concurrency: parse_env(
                    "PAYPAL_FANOUT_CONCURRENCY",
                    paypal_defaults.fanout_concurrency,
                )?,
                requests_per_second: parse_env(
                    "PAYPAL_REQUESTS_PER_SECOND",
                    paypal_defaults.requests_per_second,
                )?,
            },
            snapshot: SnapshotConfig {
                deadline_secs: parse_env("SNAPSHOT_DEADLINE_SECS", 60)?,
                max_deadline_secs: parse_env("SNAPSHOT_MAX_DEADLINE_SECS", 300)?,
            },
            http_client: HttpClientConfig {
                timeout_secs: parse_env("HTTP_CLIENT_TIMEOUT_SECS", 30)?,
            },
        })
    }
}

/// Accepts a date (`2020-01-01`) or a full RFC 3339 timestamp.
fn parse_history_start(value: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "PAYPAL_HISTORY_START must be a date or RFC 3339 timestamp: {}",
                e
            ))
        })
}

/// Tunables always fall back to their default, even in production.
fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}
