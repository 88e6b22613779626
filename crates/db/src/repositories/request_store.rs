//! `SeaORM` implementation of the workflow request store.
//!
//! A request row carries a `version` column. Every transition is written in
//! one database transaction that first bumps the version with
//! `UPDATE ... WHERE id = ? AND version = ?`; zero affected rows means the
//! caller lost the race and nothing else is written.

use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use flowgate_core::workflow::{
    RequestMutation, RequestStatus, RequestStore, StoreError, TimelineEntry, WorkflowRequest,
};
use flowgate_shared::types::{RequestId, UserId};

use super::mapping::{entry_from_model, entry_model, request_from_models, request_model, step_model};
use crate::entities::{approval_steps, timeline_entries, workflow_requests};

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Rolls back a write that matched no row and says why.
async fn stale(txn: DatabaseTransaction, id: RequestId, expected: i64) -> StoreError {
    let actual: Result<Option<i64>, DbErr> = workflow_requests::Entity::find_by_id(id.into_inner())
        .select_only()
        .column(workflow_requests::Column::Version)
        .into_tuple()
        .one(&txn)
        .await;
    if let Err(err) = txn.rollback().await {
        return backend(err);
    }
    match actual {
        Err(err) => backend(err),
        Ok(None) => StoreError::NotFound(id),
        Ok(Some(actual)) => {
            tracing::debug!(request_id = %id, expected, actual, "stale write rejected");
            StoreError::VersionConflict {
                request_id: id,
                expected,
                actual,
            }
        }
    }
}

/// Request store backed by Postgres or SQLite.
#[derive(Debug, Clone)]
pub struct SeaOrmRequestStore {
    db: DatabaseConnection,
}

impl SeaOrmRequestStore {
    /// Creates a new store.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Loads requests and their steps, keeping the order of `models`.
    async fn hydrate(
        &self,
        models: Vec<workflow_requests::Model>,
    ) -> Result<Vec<WorkflowRequest>, StoreError> {
        if models.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
        let mut steps: HashMap<Uuid, Vec<approval_steps::Model>> = HashMap::new();
        for step in approval_steps::Entity::find()
            .filter(approval_steps::Column::RequestId.is_in(ids))
            .all(&self.db)
            .await
            .map_err(backend)?
        {
            steps.entry(step.request_id).or_default().push(step);
        }

        models
            .into_iter()
            .map(|m| {
                let own = steps.remove(&m.id).unwrap_or_default();
                request_from_models(m, own)
            })
            .collect()
    }
}

#[async_trait]
impl RequestStore for SeaOrmRequestStore {
    async fn create_request(
        &self,
        mut request: WorkflowRequest,
        entry: TimelineEntry,
    ) -> Result<WorkflowRequest, StoreError> {
        let id = request.id;
        request.version = 1;

        let txn = self.db.begin().await.map_err(backend)?;
        if let Err(e) = request_model(&request, 1)?.insert(&txn).await {
            return Err(match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::Duplicate(id),
                _ => backend(e),
            });
        }
        for (position, step) in request.steps.iter().enumerate() {
            step_model(step, position)?
                .insert(&txn)
                .await
                .map_err(backend)?;
        }
        entry_model(&entry).insert(&txn).await.map_err(backend)?;
        txn.commit().await.map_err(backend)?;

        tracing::debug!(request_id = %id, steps = request.steps.len(), "request stored");
        Ok(request)
    }

    async fn get_request(&self, id: RequestId) -> Result<WorkflowRequest, StoreError> {
        let model = workflow_requests::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound(id))?;
        self.hydrate(vec![model])
            .await?
            .pop()
            .ok_or(StoreError::NotFound(id))
    }

    async fn compare_and_swap(
        &self,
        id: RequestId,
        expected_version: i64,
        mutation: RequestMutation,
    ) -> Result<WorkflowRequest, StoreError> {
        let RequestMutation { mut request, entry } = mutation;
        let next_version = expected_version + 1;
        request.version = next_version;
        let row = request_model(&request, next_version)?;

        let txn = self.db.begin().await.map_err(backend)?;
        let result = workflow_requests::Entity::update_many()
            .set(row)
            .filter(workflow_requests::Column::Id.eq(id.into_inner()))
            .filter(workflow_requests::Column::Version.eq(expected_version))
            .exec(&txn)
            .await
            .map_err(backend)?;

        if result.rows_affected == 0 {
            return Err(stale(txn, id, expected_version).await);
        }

        for (position, step) in request.steps.iter().enumerate() {
            step_model(step, position)?
                .update(&txn)
                .await
                .map_err(backend)?;
        }
        entry_model(&entry).insert(&txn).await.map_err(backend)?;
        txn.commit().await.map_err(backend)?;

        Ok(request)
    }

    async fn list_by_approver(
        &self,
        user_id: UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<WorkflowRequest>, StoreError> {
        let ids: Vec<Uuid> = approval_steps::Entity::find()
            .select_only()
            .column(approval_steps::Column::RequestId)
            .filter(approval_steps::Column::ApproverId.eq(user_id.into_inner()))
            .distinct()
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(backend)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = workflow_requests::Entity::find()
            .filter(workflow_requests::Column::Id.is_in(ids));
        if let Some(status) = status {
            query = query.filter(workflow_requests::Column::Status.eq(status.as_str()));
        }
        let models = query
            .order_by_asc(workflow_requests::Column::CreatedAt)
            .order_by_asc(workflow_requests::Column::Id)
            .all(&self.db)
            .await
            .map_err(backend)?;
        self.hydrate(models).await
    }

    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<WorkflowRequest>, StoreError> {
        let labels: Vec<&str> = statuses.iter().map(RequestStatus::as_str).collect();
        let models = workflow_requests::Entity::find()
            .filter(workflow_requests::Column::Status.is_in(labels))
            .order_by_asc(workflow_requests::Column::CreatedAt)
            .order_by_asc(workflow_requests::Column::Id)
            .all(&self.db)
            .await
            .map_err(backend)?;
        self.hydrate(models).await
    }

    async fn append_timeline(
        &self,
        expected_version: i64,
        entry: TimelineEntry,
    ) -> Result<TimelineEntry, StoreError> {
        let id = entry.request_id;
        let txn = self.db.begin().await.map_err(backend)?;
        // No-op write: takes the row lock and fails if a transition got there first.
        let result = workflow_requests::Entity::update_many()
            .col_expr(
                workflow_requests::Column::Version,
                Expr::col(workflow_requests::Column::Version).into(),
            )
            .filter(workflow_requests::Column::Id.eq(id.into_inner()))
            .filter(workflow_requests::Column::Version.eq(expected_version))
            .exec(&txn)
            .await
            .map_err(backend)?;
        if result.rows_affected == 0 {
            return Err(stale(txn, id, expected_version).await);
        }

        let model = entry_model(&entry).insert(&txn).await.map_err(backend)?;
        txn.commit().await.map_err(backend)?;
        entry_from_model(model)
    }

    async fn timeline(&self, id: RequestId) -> Result<Vec<TimelineEntry>, StoreError> {
        // Distinguish "no such request" from "no entries".
        self.get_request(id).await?;
        timeline_entries::Entity::find()
            .filter(timeline_entries::Column::RequestId.eq(id.into_inner()))
            .order_by_asc(timeline_entries::Column::CreatedAt)
            .order_by_asc(timeline_entries::Column::Sequence)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(entry_from_model)
            .collect()
    }

    async fn latest_timeline(
        &self,
        id: RequestId,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, StoreError> {
        self.get_request(id).await?;
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        timeline_entries::Entity::find()
            .filter(timeline_entries::Column::RequestId.eq(id.into_inner()))
            .order_by_desc(timeline_entries::Column::CreatedAt)
            .order_by_desc(timeline_entries::Column::Sequence)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(entry_from_model)
            .collect()
    }
}
