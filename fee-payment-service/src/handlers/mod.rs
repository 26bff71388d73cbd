//! HTTP handlers for fee-payment-service.

pub mod fees;
pub mod payments;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use service_core::error::AppError;

use crate::services::get_metrics;
use crate::startup::AppState;

/// Liveness check.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "fee-payment-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check; fails while the store is unreachable.
pub async fn readiness_check(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok((StatusCode::OK, Json(json!({ "status": "ready" }))))
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
