//! Approver inbox.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde_json::json;

use crate::{AppState, error::ApiError, middleware::ActorIdentity};

/// Creates the inbox routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/inbox", get(inbox))
}

/// GET `/inbox` - Requests the caller can act on now, most urgent first.
async fn inbox(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
) -> Result<impl IntoResponse, ApiError> {
    let requests = state.engine.inbox(&actor).await?;
    Ok(Json(json!({ "data": requests })))
}
