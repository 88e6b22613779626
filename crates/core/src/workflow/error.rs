//! Workflow error types for the approval engine.
//!
//! Every rejected operation maps to exactly one of these variants; callers
//! never have to parse messages to tell them apart.

use thiserror::Error;

use flowgate_shared::AppError;
use flowgate_shared::types::{RequestId, StepId, UserId};

use crate::workflow::notify::NotificationError;
use crate::workflow::store::StoreError;
use crate::workflow::types::{RequestStatus, StepStatus};

/// Errors that can occur during workflow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// Malformed input: unknown enum value, empty chain, missing comment.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The actor is not allowed to perform the operation.
    #[error("User {actor_id} is not allowed to {operation}")]
    PermissionDenied {
        /// The user who attempted the operation.
        actor_id: UserId,
        /// What was attempted.
        operation: String,
    },

    /// The step is not awaiting a decision.
    #[error("Step {step_id} is {status} and cannot be acted on")]
    InvalidStepState {
        /// The step that was targeted.
        step_id: StepId,
        /// Its current status.
        status: StepStatus,
    },

    /// The request's status forbids the operation.
    #[error("Cannot {action} a request that is {from}")]
    InvalidTransition {
        /// The current status.
        from: RequestStatus,
        /// The attempted operation.
        action: String,
    },

    /// Request or step not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A concurrent writer won the race for this request.
    #[error("Request {request_id} changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        /// The contended request.
        request_id: RequestId,
        /// Version the caller read.
        expected: i64,
        /// Version found in the store.
        actual: i64,
    },

    /// The store failed or timed out; nothing was committed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Notification delivery failed. Never returned for a committed transition.
    #[error("Notification error: {0}")]
    Notification(String),
}

impl WorkflowError {
    /// Shorthand for a permission failure.
    pub fn denied(actor_id: UserId, operation: impl Into<String>) -> Self {
        Self::PermissionDenied {
            actor_id,
            operation: operation.into(),
        }
    }

    /// Shorthand for an invalid request transition.
    pub fn transition(from: RequestStatus, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from,
            action: action.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::PermissionDenied { .. } => 403,
            Self::NotFound(_) => 404,
            Self::InvalidStepState { .. }
            | Self::InvalidTransition { .. }
            | Self::VersionConflict { .. } => 409,
            Self::Notification(_) => 502,
            Self::Persistence(_) => 503,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::InvalidStepState { .. } => "INVALID_STEP_STATE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Notification(_) => "NOTIFICATION_ERROR",
        }
    }

    /// Returns true if the same call may succeed when retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::Persistence(_))
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(format!("Request {id}")),
            StoreError::VersionConflict {
                request_id,
                expected,
                actual,
            } => Self::VersionConflict {
                request_id,
                expected,
                actual,
            },
            StoreError::Duplicate(id) => {
                Self::Validation(format!("request {id} already exists"))
            }
            StoreError::Timeout(elapsed) => {
                Self::Persistence(format!("store call timed out after {elapsed:?}"))
            }
            StoreError::Backend(msg) => Self::Persistence(msg),
        }
    }
}

impl From<NotificationError> for WorkflowError {
    fn from(err: NotificationError) -> Self {
        Self::Notification(err.to_string())
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err {
            WorkflowError::Validation(_) => Self::Validation(message),
            WorkflowError::PermissionDenied { .. } => Self::Forbidden(message),
            WorkflowError::NotFound(_) => Self::NotFound(message),
            WorkflowError::InvalidStepState { .. }
            | WorkflowError::InvalidTransition { .. }
            | WorkflowError::VersionConflict { .. } => Self::Conflict(message),
            WorkflowError::Persistence(_) => Self::Unavailable(message),
            WorkflowError::Notification(_) => Self::ExternalService(message),
        }
    }
}
