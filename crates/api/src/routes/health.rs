use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the image engine is reachable.
    pub engine_healthy: bool,
    /// Request limits clients should respect.
    pub limits: Limits,
}

/// Request limits as configured at startup.
#[derive(Serialize)]
pub struct Limits {
    /// Largest accepted upload body in bytes.
    pub max_upload_bytes: usize,
    /// Seconds an operation may take before it fails with 504.
    pub engine_timeout_secs: u64,
    /// Operations the engine runs at once; more wait for a slot.
    pub max_concurrent_jobs: usize,
}

/// GET /health -- returns service and engine health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_healthy = state.engine.is_healthy().await;

    let status = if engine_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        engine_healthy,
        limits: Limits {
            max_upload_bytes: state.config.max_upload_bytes,
            engine_timeout_secs: state.config.engine_timeout_secs,
            max_concurrent_jobs: state.config.max_concurrent_jobs,
        },
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
