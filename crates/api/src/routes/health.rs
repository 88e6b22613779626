//! Health check endpoints.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::{AppState, error::ApiError};

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Readiness response.
#[derive(Serialize)]
pub struct ReadyResponse {
    /// Service status.
    pub status: &'static str,
    /// Requests still awaiting a decision.
    pub active_requests: usize,
}

/// Liveness handler.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness handler; fails when the request store cannot be read.
async fn readiness(State(state): State<AppState>) -> Result<Json<ReadyResponse>, ApiError> {
    let active = state.engine.active_requests().await?;
    Ok(Json(ReadyResponse {
        status: "ready",
        active_requests: active.len(),
    }))
}

/// Creates health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
}
