//! HTTP API layer with Axum routes over the workflow engine.
//!
//! This crate provides:
//! - REST API routes under `/api/v1`
//! - The caller identity extractor
//! - JSON error responses

pub mod error;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use flowgate_core::workflow::WorkflowEngine;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The workflow engine.
    pub engine: Arc<WorkflowEngine>,
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
