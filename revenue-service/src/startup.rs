//! Application startup and lifecycle management.

use crate::config::RevenueConfig;
use crate::handlers;
use crate::services::{PayPalAdapter, SecretProvider, SnapshotAssembler, StripeAdapter};
use axum::{middleware::from_fn, routing::get, Router};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: RevenueConfig,
    pub assembler: SnapshotAssembler,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application. Credentials are looked up through `secrets`
    /// on every snapshot run.
    pub async fn build(
        config: RevenueConfig,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_client.timeout_secs))
            .user_agent(concat!("revenue-service/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                AppError::InternalError(e.into())
            })?;

        let stripe = StripeAdapter::new(http.clone(), config.stripe.clone(), secrets.clone());
        let paypal = PayPalAdapter::new(http, config.paypal.clone(), secrets);
        let assembler = SnapshotAssembler::new(
            Arc::new(stripe),
            Arc::new(paypal),
            config.snapshot.deadline(),
        );

        let state = AppState {
            config: config.clone(),
            assembler,
        };

        // Port 0 binds a random port for tests
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            stripe_base_url = %config.stripe.api_base_url,
            paypal_base_url = %config.paypal.api_base_url,
            "Revenue service bound"
        );

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the HTTP server until it fails.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);
        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/snapshot", get(handlers::get_snapshot))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
