//! Persistence contract for requests, steps and timelines.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use flowgate_shared::types::{RequestId, UserId};

use crate::workflow::timeline::TimelineEntry;
use crate::workflow::types::{RequestStatus, WorkflowRequest};

/// Errors raised by a [`RequestStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No request with this ID.
    #[error("request {0} not found")]
    NotFound(RequestId),

    /// The stored version differs from the one the write was based on.
    #[error("request {request_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// The contended request.
        request_id: RequestId,
        /// Version the write was based on.
        expected: i64,
        /// Version currently stored.
        actual: i64,
    },

    /// A request with this ID already exists.
    #[error("request {0} already exists")]
    Duplicate(RequestId),

    /// The call did not finish in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Backend failure (connection, constraint, serialization).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One atomic write: the new request snapshot and the entry recording it.
#[derive(Debug, Clone)]
pub struct RequestMutation {
    /// Snapshot to store; its `version` is ignored.
    pub request: WorkflowRequest,
    /// Timeline entry appended in the same unit.
    pub entry: TimelineEntry,
}

/// Durable storage with compare-and-swap writes.
///
/// Implementations must commit the request row, every step and the timeline
/// entry together, or none of them.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Inserts a new request at version 1 with its first timeline entry.
    async fn create_request(
        &self,
        request: WorkflowRequest,
        entry: TimelineEntry,
    ) -> Result<WorkflowRequest, StoreError>;

    /// Loads a request with all its steps.
    async fn get_request(&self, id: RequestId) -> Result<WorkflowRequest, StoreError>;

    /// Writes `mutation` if the stored version still equals
    /// `expected_version`, bumping it by one.
    async fn compare_and_swap(
        &self,
        id: RequestId,
        expected_version: i64,
        mutation: RequestMutation,
    ) -> Result<WorkflowRequest, StoreError>;

    /// Requests with a step assigned to `user_id`, optionally filtered by status.
    async fn list_by_approver(
        &self,
        user_id: UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<WorkflowRequest>, StoreError>;

    /// Requests in any of `statuses`.
    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<WorkflowRequest>, StoreError>;

    /// Appends an entry that does not change the request (comments).
    ///
    /// The entry's status was read at `expected_version`; if a transition
    /// committed since, nothing is written and `VersionConflict` is returned.
    /// The version itself is not bumped.
    async fn append_timeline(
        &self,
        expected_version: i64,
        entry: TimelineEntry,
    ) -> Result<TimelineEntry, StoreError>;

    /// Full history, oldest first.
    async fn timeline(&self, id: RequestId) -> Result<Vec<TimelineEntry>, StoreError>;

    /// The `limit` most recent entries, newest first.
    async fn latest_timeline(
        &self,
        id: RequestId,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, StoreError>;
}
