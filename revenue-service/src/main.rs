use revenue_service::config::RevenueConfig;
use revenue_service::services::{init_metrics, EnvSecrets};
use revenue_service::Application;
use service_core::observability::init_tracing;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RevenueConfig::load()?;

    init_tracing(
        "revenue-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );
    init_metrics();

    let application = Application::build(config, Arc::new(EnvSecrets)).await?;
    tracing::info!(port = application.port(), "Starting revenue-service");
    application.run_until_stopped().await?;

    Ok(())
}
