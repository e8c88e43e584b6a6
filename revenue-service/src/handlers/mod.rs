//! HTTP handlers for revenue-service.

use crate::dtos::{SnapshotQuery, SnapshotResponse};
use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use service_core::error::AppError;

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "revenue-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

pub async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Build a fresh revenue snapshot from both providers.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<SnapshotResponse>, AppError> {
    let deadline = query
        .timeout_secs
        .map(|secs| state.config.snapshot.clamp(secs));

    let snapshot = state.assembler.build(deadline).await?;
    Ok(Json(snapshot.into()))
}
