pub mod assembler;
pub mod metrics;
pub mod normalizer;
pub mod pagination;
pub mod plan_cache;
pub mod providers;
pub mod revenue_window;
pub mod secrets;
pub mod throttle;

pub use assembler::{AggregationError, SnapshotAssembler};
pub use metrics::{get_metrics, init_metrics};
pub use providers::{PayPalAdapter, PayPalConfig, RevenueProvider, StripeAdapter, StripeConfig};
pub use secrets::{EnvSecrets, SecretProvider, StaticSecrets};
