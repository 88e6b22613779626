//! Conversions between workflow domain types and database rows.
//!
//! Enums are stored as their lowercase labels. Any row that fails to parse
//! back is reported as a backend error rather than silently defaulted.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::NotSet;
use sea_orm::Set;
use sea_orm::prelude::DateTimeWithTimeZone;

use flowgate_core::workflow::{
    ApprovalStep, RequestPayload, RequestStatus, StepAssignment, StoreError, TimelineEntry,
    WorkflowRequest,
};

use crate::entities::{approval_steps, timeline_entries, workflow_requests};

fn corrupt(what: &str, value: impl Display) -> StoreError {
    StoreError::Backend(format!("stored {what} `{value}` is invalid"))
}

fn parse<T: FromStr>(what: &str, value: &str) -> Result<T, StoreError> {
    value.parse().map_err(|_| corrupt(what, value))
}

fn to_db_int(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| corrupt(what, value))
}

fn from_db_int(value: i32, what: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt(what, value))
}

fn utc(value: DateTimeWithTimeZone) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

/// Request row with every column set; the caller picks the version.
pub(crate) fn request_model(
    request: &WorkflowRequest,
    version: i64,
) -> Result<workflow_requests::ActiveModel, StoreError> {
    let payload = serde_json::to_value(&request.payload)
        .map_err(|e| StoreError::Backend(format!("payload serialization failed: {e}")))?;
    Ok(workflow_requests::ActiveModel {
        id: Set(request.id.into_inner()),
        tenant_id: Set(request.tenant_id.into_inner()),
        requester_id: Set(request.requester_id.into_inner()),
        requester_name: Set(request.requester_name.clone()),
        title: Set(request.title.clone()),
        request_type: Set(request.request_type().as_str().to_string()),
        status: Set(request.status.as_str().to_string()),
        priority: Set(request.priority.as_str().to_string()),
        payload: Set(payload),
        current_step: Set(to_db_int(request.current_step, "current step")?),
        due_date: Set(request.due_date),
        version: Set(version),
        created_at: Set(request.created_at.into()),
        updated_at: Set(request.updated_at.into()),
    })
}

pub(crate) fn step_model(
    step: &ApprovalStep,
    position: usize,
) -> Result<approval_steps::ActiveModel, StoreError> {
    let position = i32::try_from(position).map_err(|_| corrupt("step position", position))?;
    let timeout_hours = step
        .timeout_hours
        .map(|h| to_db_int(h, "timeout"))
        .transpose()?;
    let original = step.escalated_from.as_ref();
    Ok(approval_steps::ActiveModel {
        id: Set(step.id.into_inner()),
        request_id: Set(step.request_id.into_inner()),
        position: Set(position),
        step_order: Set(to_db_int(step.order, "step order")?),
        approver_role: Set(step.approver_role.clone()),
        approver_id: Set(step.approver_id.map(|id| id.into_inner())),
        approver_name: Set(step.approver_name.clone()),
        status: Set(step.status.as_str().to_string()),
        execution_mode: Set(step.execution_mode.as_str().to_string()),
        timeout_hours: Set(timeout_hours),
        escalate_to: Set(step.escalate_to.map(|id| id.into_inner())),
        escalate_to_name: Set(step.escalate_to_name.clone()),
        comments: Set(step.comments.clone()),
        action_date: Set(step.action_date.map(Into::into)),
        acted_by: Set(step.acted_by.map(|id| id.into_inner())),
        became_pending_at: Set(step.became_pending_at.map(Into::into)),
        original_approver_role: Set(original.and_then(|a| a.approver_role.clone())),
        original_approver_id: Set(original.and_then(|a| a.approver_id).map(|id| id.into_inner())),
        original_approver_name: Set(original.and_then(|a| a.approver_name.clone())),
    })
}

/// Timeline row; the database assigns the sequence.
pub(crate) fn entry_model(entry: &TimelineEntry) -> timeline_entries::ActiveModel {
    timeline_entries::ActiveModel {
        sequence: NotSet,
        id: Set(entry.id.into_inner()),
        request_id: Set(entry.request_id.into_inner()),
        action: Set(entry.action.as_str().to_string()),
        actor_id: Set(entry.actor_id.map(|id| id.into_inner())),
        actor_name: Set(entry.actor_name.clone()),
        step_id: Set(entry.step_id.map(|id| id.into_inner())),
        from_status: Set(entry.from_status.map(|s| s.as_str().to_string())),
        to_status: Set(entry.to_status.as_str().to_string()),
        details: Set(entry.details.clone()),
        created_at: Set(entry.created_at.into()),
    }
}

pub(crate) fn step_from_model(model: approval_steps::Model) -> Result<ApprovalStep, StoreError> {
    // Every assignment names a role or a person.
    let escalated_from = (model.original_approver_role.is_some()
        || model.original_approver_id.is_some())
    .then(|| StepAssignment {
        approver_role: model.original_approver_role,
        approver_id: model.original_approver_id.map(Into::into),
        approver_name: model.original_approver_name,
    });
    Ok(ApprovalStep {
        id: model.id.into(),
        request_id: model.request_id.into(),
        order: from_db_int(model.step_order, "step order")?,
        approver_role: model.approver_role,
        approver_id: model.approver_id.map(Into::into),
        approver_name: model.approver_name,
        status: parse("step status", &model.status)?,
        execution_mode: parse("execution mode", &model.execution_mode)?,
        timeout_hours: model
            .timeout_hours
            .map(|h| from_db_int(h, "timeout"))
            .transpose()?,
        escalate_to: model.escalate_to.map(Into::into),
        escalate_to_name: model.escalate_to_name,
        comments: model.comments,
        action_date: model.action_date.map(utc),
        acted_by: model.acted_by.map(Into::into),
        became_pending_at: model.became_pending_at.map(utc),
        escalated_from,
    })
}

/// Rebuilds a request from its row and its step rows (any order).
pub(crate) fn request_from_models(
    model: workflow_requests::Model,
    mut steps: Vec<approval_steps::Model>,
) -> Result<WorkflowRequest, StoreError> {
    steps.sort_by_key(|s| s.position);
    let payload: RequestPayload = serde_json::from_value(model.payload)
        .map_err(|e| StoreError::Backend(format!("stored payload is invalid: {e}")))?;
    Ok(WorkflowRequest {
        id: model.id.into(),
        tenant_id: model.tenant_id.into(),
        requester_id: model.requester_id.into(),
        requester_name: model.requester_name,
        title: model.title,
        payload,
        status: parse::<RequestStatus>("request status", &model.status)?,
        current_step: from_db_int(model.current_step, "current step")?,
        priority: parse("priority", &model.priority)?,
        due_date: model.due_date,
        version: model.version,
        created_at: utc(model.created_at),
        updated_at: utc(model.updated_at),
        steps: steps
            .into_iter()
            .map(step_from_model)
            .collect::<Result<_, _>>()?,
    })
}

pub(crate) fn entry_from_model(model: timeline_entries::Model) -> Result<TimelineEntry, StoreError> {
    Ok(TimelineEntry {
        id: model.id.into(),
        request_id: model.request_id.into(),
        sequence: model.sequence,
        action: parse("timeline action", &model.action)?,
        actor_id: model.actor_id.map(Into::into),
        actor_name: model.actor_name,
        step_id: model.step_id.map(Into::into),
        from_status: model
            .from_status
            .as_deref()
            .map(|s| parse("request status", s))
            .transpose()?,
        to_status: parse("request status", &model.to_status)?,
        details: model.details,
        created_at: utc(model.created_at),
    })
}
