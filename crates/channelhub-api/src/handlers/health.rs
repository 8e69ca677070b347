//! Health check handlers.

use axum::Json;
use axum::extract::State;

use crate::dto::{ApiResponse, DetailedHealthResponse, HealthResponse};
use crate::state::AppState;

/// GET /api/health
pub async fn health() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// GET /api/health/detailed
pub async fn health_detailed(
    State(state): State<AppState>,
) -> Json<ApiResponse<DetailedHealthResponse>> {
    let running = state.hub.is_running();

    Json(ApiResponse::ok(DetailedHealthResponse {
        status: if running { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running,
        channels: state.hub.channel_count(),
        sessions: state.hub.session_count(),
        metrics: state.hub.metrics(),
    }))
}
