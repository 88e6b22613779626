//! Request lifecycle routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use flowgate_core::workflow::{
    NewRequest, RequestPayload, RequestPriority, RequestStatus, StepAction, StepSource, StepSpec,
};
use flowgate_shared::types::{RequestId, StepId, TenantId};

use crate::{AppState, error::ApiError, middleware::ActorIdentity};

/// Creates the request routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(submit_request))
        .route("/requests/{id}", get(get_request))
        .route(
            "/requests/{id}/steps/{step_id}/actions",
            post(act_on_step),
        )
        .route("/requests/{id}/cancel", post(cancel_request))
        .route("/requests/{id}/resubmit", post(resubmit_request))
        .route("/requests/{id}/complete", post(complete_request))
        .route("/requests/{id}/comments", post(add_comment))
        .route("/requests/{id}/timeline", get(get_timeline))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body for `POST /requests`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequestBody {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Short title.
    pub title: String,
    /// Type-specific payload, tagged by `type`.
    pub payload: RequestPayload,
    /// `low`, `normal`, `high` or `urgent`; defaults to `normal`.
    pub priority: Option<String>,
    /// Date a decision is needed by.
    pub due_date: Option<NaiveDate>,
    /// Explicit chain; the policy's default chain is used when absent.
    pub steps: Option<Vec<StepSpec>>,
    /// Store as a draft instead of submitting.
    #[serde(default)]
    pub draft: bool,
}

/// Body for a step action.
#[derive(Debug, Deserialize)]
pub struct StepActionBody {
    /// `approve`, `reject` or `return`.
    pub action: String,
    /// Required for reject and return.
    pub comment: Option<String>,
}

/// Optional comment body.
#[derive(Debug, Default, Deserialize)]
pub struct CommentBody {
    /// Free text.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Body for `POST /requests/{id}/comments`.
#[derive(Debug, Deserialize)]
pub struct AddCommentBody {
    /// Comment text.
    pub text: String,
}

/// Query for the timeline.
#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    /// Only the N most recent entries, newest first.
    pub latest: Option<usize>,
}

/// Body that may be omitted entirely.
fn optional_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(rejection.into()),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// POST `/requests` - Submit a request (or save a draft).
async fn submit_request(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    body: Result<Json<SubmitRequestBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let priority = match body.priority.as_deref() {
        Some(raw) => raw.parse::<RequestPriority>()?,
        None => RequestPriority::default(),
    };
    let new = NewRequest {
        tenant_id: body.tenant_id,
        requester: actor,
        title: body.title,
        payload: body.payload,
        priority,
        due_date: body.due_date,
    };
    let source = body
        .steps
        .map_or(StepSource::DefaultChain, StepSource::Supplied);

    let request = if body.draft {
        state.engine.save_draft(new, source).await?
    } else {
        state.engine.submit_request(new, source).await?
    };
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET `/requests/{id}` - Load a request with its steps.
async fn get_request(
    State(state): State<AppState>,
    ActorIdentity(_actor): ActorIdentity,
    Path(id): Path<RequestId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.get_request(id).await?))
}

/// POST `/requests/{id}/steps/{step_id}/actions` - Approve, reject or return.
async fn act_on_step(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path((id, step_id)): Path<(RequestId, StepId)>,
    body: Result<Json<StepActionBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let action: StepAction = body.action.parse()?;
    let request = state
        .engine
        .act_on_step(id, step_id, &actor, action, body.comment)
        .await?;
    Ok(Json(request))
}

/// POST `/requests/{id}/cancel` - Withdraw a request.
async fn cancel_request(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<RequestId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.cancel_request(id, &actor).await?))
}

/// POST `/requests/{id}/resubmit` - Submit a draft or a returned request.
async fn resubmit_request(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<RequestId>,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = optional_body(body)?;
    let current = state.engine.get_request(id).await?;
    let request = if current.status == RequestStatus::Draft {
        state.engine.submit_draft(id, &actor).await?
    } else {
        state
            .engine
            .resubmit_request(id, &actor, body.comment)
            .await?
    };
    Ok(Json(request))
}

/// POST `/requests/{id}/complete` - Mark an approved request fulfilled.
async fn complete_request(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<RequestId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.complete_request(id, &actor).await?))
}

/// POST `/requests/{id}/comments` - Add a timeline comment.
async fn add_comment(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<RequestId>,
    body: Result<Json<AddCommentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let entry = state.engine.add_comment(id, &actor, &body.text).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET `/requests/{id}/timeline` - Full timeline, or the latest N entries.
async fn get_timeline(
    State(state): State<AppState>,
    ActorIdentity(_actor): ActorIdentity,
    Path(id): Path<RequestId>,
    query: Result<Query<TimelineQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let entries = match query.latest {
        Some(limit) => state.engine.latest_timeline(id, limit).await?,
        None => state.engine.timeline(id).await?,
    };
    Ok(Json(json!({ "data": entries })))
}
