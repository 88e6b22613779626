//! Workflow service for request state transitions.
//!
//! This module is the state machine. Every operation takes a request
//! snapshot and returns the next snapshot together with the timeline entry
//! and notifications it produces. Nothing here touches storage; the engine
//! commits the result with compare-and-swap.

use chrono::{DateTime, Utc};
use serde_json::json;

use flowgate_shared::types::{RequestId, StepId};

use crate::workflow::approval::ApprovalEngine;
use crate::workflow::error::WorkflowError;
use crate::workflow::notify::{NotificationEvent, NotificationKind};
use crate::workflow::timeline::{TimelineAction, TimelineEntry};
use crate::workflow::types::{
    Actor, ApprovalStep, NewRequest, RequestStatus, StepAction, StepAssignment, StepStatus,
    WorkflowRequest,
};

/// How steps are re-initialized when a request is returned for correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnPolicy {
    /// Every step goes back to waiting and the chain starts over.
    #[default]
    Restart,
    /// Earlier stages keep their approvals; the returned stage onwards is reset.
    Resume,
}

impl ReturnPolicy {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Resume => "resume",
        }
    }
}

impl std::str::FromStr for ReturnPolicy {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "restart" => Ok(Self::Restart),
            "resume" => Ok(Self::Resume),
            other => Err(WorkflowError::Validation(format!(
                "unknown return policy `{other}`"
            ))),
        }
    }
}

/// The outcome of one state-machine step, ready to be committed.
#[derive(Debug, Clone)]
pub struct Transition {
    /// The request after the transition.
    pub request: WorkflowRequest,
    /// Audit entry recording it.
    pub entry: TimelineEntry,
    /// Events to deliver once committed.
    pub notifications: Vec<NotificationEvent>,
}

/// Stateless service for request workflow transitions.
pub struct WorkflowService;

impl WorkflowService {
    /// Builds a submitted request from resolved steps and activates stage 0.
    #[must_use]
    pub fn create(
        id: RequestId,
        new: NewRequest,
        steps: Vec<ApprovalStep>,
        now: DateTime<Utc>,
    ) -> Transition {
        let mut request = Self::materialize(id, new, steps, RequestStatus::Pending, now);
        let first = request.stage_orders().first().copied().unwrap_or(0);
        request.current_step = first;
        request.activate_stage(first, now);

        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Created,
            None,
            RequestStatus::Pending,
            now,
        )
        .by(request.requester_id, request.requester_name.clone());
        let notifications = Self::approval_requests(&request);

        Transition {
            request,
            entry,
            notifications,
        }
    }

    /// Builds a draft: steps resolved and stored, nothing active.
    #[must_use]
    pub fn draft(
        id: RequestId,
        new: NewRequest,
        steps: Vec<ApprovalStep>,
        now: DateTime<Utc>,
    ) -> Transition {
        let request = Self::materialize(id, new, steps, RequestStatus::Draft, now);
        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Drafted,
            None,
            RequestStatus::Draft,
            now,
        )
        .by(request.requester_id, request.requester_name.clone());

        Transition {
            request,
            entry,
            notifications: Vec::new(),
        }
    }

    /// Submits a draft for approval.
    pub fn submit(
        mut request: WorkflowRequest,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if actor.id != request.requester_id {
            return Err(WorkflowError::denied(actor.id, "submit another user's draft"));
        }
        let from = request.status;
        if from != RequestStatus::Draft {
            return Err(WorkflowError::transition(from, "submit"));
        }

        let first = request.stage_orders().first().copied().unwrap_or(0);
        request.current_step = first;
        request.activate_stage(first, now);
        Self::set_status(&mut request, RequestStatus::Pending, "submit", now)?;

        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Submitted,
            Some(from),
            request.status,
            now,
        )
        .by(actor.id, actor.name.clone());
        let notifications = Self::approval_requests(&request);

        Ok(Transition {
            request,
            entry,
            notifications,
        })
    }

    /// Dispatches a step decision.
    pub fn act(
        request: WorkflowRequest,
        step_id: StepId,
        actor: &Actor,
        action: StepAction,
        comment: Option<String>,
        return_policy: ReturnPolicy,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        match action {
            StepAction::Approve => Self::approve(request, step_id, actor, comment, now),
            StepAction::Reject => Self::reject(request, step_id, actor, comment, now),
            StepAction::Return => {
                Self::return_for_correction(request, step_id, actor, comment, return_policy, now)
            }
        }
    }

    /// Approves one step, advancing the chain when its stage is complete.
    ///
    /// Sibling completeness is evaluated on the snapshot passed in, so a
    /// caller racing another approver must reload and call again.
    pub fn approve(
        mut request: WorkflowRequest,
        step_id: StepId,
        actor: &Actor,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let index = Self::actionable_step(&request, step_id, actor, "approve")?;
        let from = request.status;
        let comment = normalize_comment(comment);

        let step = &mut request.steps[index];
        step.status = StepStatus::Approved;
        step.action_date = Some(now);
        step.acted_by = Some(actor.id);
        step.comments.clone_from(&comment);

        let current = request.current_step;
        let stage_done = request
            .stage(current)
            .all(|s| s.status == StepStatus::Approved);
        let mut advanced = false;
        if stage_done && let Some(next) = request.next_stage_after(current) {
            request.current_step = next;
            request.activate_stage(next, now);
            advanced = true;
        }

        let to = Self::derive_status(&request);
        Self::set_status(&mut request, to, "approve", now)?;

        let mut notifications = Vec::new();
        if advanced {
            notifications.extend(Self::approval_requests(&request));
        }
        match to {
            RequestStatus::Approved => notifications.push(Self::to_requester(
                &request,
                NotificationKind::RequestApproved,
                comment.as_deref(),
            )),
            RequestStatus::PartiallyApproved => notifications.push(Self::to_requester(
                &request,
                NotificationKind::PartiallyApproved,
                comment.as_deref(),
            )),
            _ => {}
        }

        let entry = TimelineEntry::new(request.id, TimelineAction::Approved, Some(from), to, now)
            .by(actor.id, actor.name.clone())
            .on_step(step_id)
            .with_details(comment);

        Ok(Transition {
            request,
            entry,
            notifications,
        })
    }

    /// Rejects the request outright; every other open step is skipped.
    pub fn reject(
        mut request: WorkflowRequest,
        step_id: StepId,
        actor: &Actor,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let reason = require_comment(comment, "rejection")?;
        let index = Self::actionable_step(&request, step_id, actor, "reject")?;
        let from = request.status;

        for (i, step) in request.steps.iter_mut().enumerate() {
            if i == index {
                step.status = StepStatus::Rejected;
                step.action_date = Some(now);
                step.acted_by = Some(actor.id);
                step.comments = Some(reason.clone());
            } else if step.status.is_open() {
                step.status = StepStatus::Skipped;
            }
        }
        Self::set_status(&mut request, RequestStatus::Rejected, "reject", now)?;

        let notifications = vec![Self::to_requester(
            &request,
            NotificationKind::RequestRejected,
            Some(&reason),
        )];
        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Rejected,
            Some(from),
            RequestStatus::Rejected,
            now,
        )
        .by(actor.id, actor.name.clone())
        .on_step(step_id)
        .with_details(Some(reason));

        Ok(Transition {
            request,
            entry,
            notifications,
        })
    }

    /// Sends the request back to the requester for correction.
    pub fn return_for_correction(
        mut request: WorkflowRequest,
        step_id: StepId,
        actor: &Actor,
        comment: Option<String>,
        policy: ReturnPolicy,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let reason = require_comment(comment, "return")?;
        Self::actionable_step(&request, step_id, actor, "return")?;
        let from = request.status;

        let returned_stage = request.current_step;
        let reset_from = match policy {
            ReturnPolicy::Restart => 0,
            ReturnPolicy::Resume => returned_stage,
        };
        for step in request.steps.iter_mut().filter(|s| s.order >= reset_from) {
            step.reset();
        }
        request.current_step = match policy {
            ReturnPolicy::Restart => request.stage_orders().first().copied().unwrap_or(0),
            ReturnPolicy::Resume => returned_stage,
        };
        Self::set_status(&mut request, RequestStatus::Returned, "return", now)?;

        let notifications = vec![Self::to_requester(
            &request,
            NotificationKind::RequestReturned,
            Some(&reason),
        )];
        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Returned,
            Some(from),
            RequestStatus::Returned,
            now,
        )
        .by(actor.id, actor.name.clone())
        .on_step(step_id)
        .with_details(Some(format!("{reason} [policy: {}]", policy.as_str())));

        Ok(Transition {
            request,
            entry,
            notifications,
        })
    }

    /// Puts a returned request back into review.
    pub fn resubmit(
        mut request: WorkflowRequest,
        actor: &Actor,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if actor.id != request.requester_id {
            return Err(WorkflowError::denied(actor.id, "resubmit another user's request"));
        }
        let from = request.status;
        if from != RequestStatus::Returned {
            return Err(WorkflowError::transition(from, "resubmit"));
        }

        let current = request.current_step;
        request.activate_stage(current, now);
        Self::set_status(&mut request, RequestStatus::Pending, "resubmit", now)?;

        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Resubmitted,
            Some(from),
            RequestStatus::Pending,
            now,
        )
        .by(actor.id, actor.name.clone())
        .with_details(normalize_comment(comment));
        let notifications = Self::approval_requests(&request);

        Ok(Transition {
            request,
            entry,
            notifications,
        })
    }

    /// Withdraws a request. Only the requester or an admin may cancel.
    pub fn cancel(
        mut request: WorkflowRequest,
        actor: &Actor,
        admin_roles: &[String],
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if actor.id != request.requester_id && !ApprovalEngine::is_admin(actor, admin_roles) {
            return Err(WorkflowError::denied(actor.id, "cancel this request"));
        }
        let from = request.status;
        if !from.is_cancellable() {
            return Err(WorkflowError::transition(from, "cancel"));
        }

        let notifications: Vec<_> = request
            .active_steps()
            .filter_map(|s| s.approver_id)
            .map(|to| {
                NotificationEvent::new(
                    request.id,
                    to,
                    NotificationKind::RequestCancelled,
                    json!({ "title": request.title, "cancelled_by": actor.name }),
                )
            })
            .collect();

        for step in request.steps.iter_mut().filter(|s| s.status.is_open()) {
            step.status = StepStatus::Skipped;
        }
        Self::set_status(&mut request, RequestStatus::Cancelled, "cancel", now)?;

        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Cancelled,
            Some(from),
            RequestStatus::Cancelled,
            now,
        )
        .by(actor.id, actor.name.clone());

        Ok(Transition {
            request,
            entry,
            notifications,
        })
    }

    /// Reassigns an overdue step to its fallback approver.
    ///
    /// Returns `Ok(None)` when there is nothing to do: the step is no longer
    /// pending, not yet overdue, outside the active stage, or the request
    /// has left review. That makes a repeated sweep a no-op.
    pub fn escalate(
        mut request: WorkflowRequest,
        step_id: StepId,
        fallback_role: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>, WorkflowError> {
        let index = request
            .step_index(step_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Step {step_id}")))?;
        let from = request.status;
        {
            let step = &request.steps[index];
            if !from.is_actionable()
                || step.order != request.current_step
                || !step.is_overdue(now)
            {
                return Ok(None);
            }
        }

        // A requester can never approve, so they are not a usable target.
        let requester_id = request.requester_id;
        let step = &mut request.steps[index];
        let original = step.assignment_label();
        let since = step.became_pending_at;
        let to = match step.escalate_to.filter(|t| *t != requester_id) {
            Some(target) => StepAssignment {
                approver_role: None,
                approver_id: Some(target),
                approver_name: step.escalate_to_name.clone(),
            },
            None => StepAssignment {
                approver_role: Some(fallback_role.trim().to_lowercase()),
                approver_id: None,
                approver_name: None,
            },
        };
        step.reassign(to);
        step.status = StepStatus::Escalated;
        step.became_pending_at = Some(now);
        let target = step.assignment_label();
        let timeout = step.timeout_hours.unwrap_or_default();
        let recipient = step.approver_id;

        Self::set_status(&mut request, RequestStatus::Escalated, "escalate", now)?;

        let details = format!(
            "reassigned from {original} to {target} after {timeout}h (pending since {})",
            since.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339())
        );
        let notifications: Vec<_> = recipient
            .map(|to| {
                NotificationEvent::new(
                    request.id,
                    to,
                    NotificationKind::StepEscalated,
                    json!({ "title": request.title, "step_id": step_id, "previous": original }),
                )
            })
            .into_iter()
            .collect();
        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Escalated,
            Some(from),
            RequestStatus::Escalated,
            now,
        )
        .on_step(step_id)
        .with_details(Some(details));

        Ok(Some(Transition {
            request,
            entry,
            notifications,
        }))
    }

    /// Marks an approved request as fulfilled. Admins only.
    pub fn complete(
        mut request: WorkflowRequest,
        actor: &Actor,
        admin_roles: &[String],
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if !ApprovalEngine::is_admin(actor, admin_roles) {
            return Err(WorkflowError::denied(actor.id, "complete requests"));
        }
        let from = request.status;
        if from != RequestStatus::Approved {
            return Err(WorkflowError::transition(from, "complete"));
        }
        Self::set_status(&mut request, RequestStatus::Completed, "complete", now)?;

        let notifications = vec![Self::to_requester(
            &request,
            NotificationKind::RequestCompleted,
            None,
        )];
        let entry = TimelineEntry::new(
            request.id,
            TimelineAction::Completed,
            Some(from),
            RequestStatus::Completed,
            now,
        )
        .by(actor.id, actor.name.clone());

        Ok(Transition {
            request,
            entry,
            notifications,
        })
    }

    /// Builds a comment entry. The request itself is not modified.
    pub fn comment(
        request: &WorkflowRequest,
        actor: &Actor,
        text: &str,
        admin_roles: &[String],
        now: DateTime<Utc>,
    ) -> Result<TimelineEntry, WorkflowError> {
        let text = require_comment(Some(text.to_string()), "comment")?;
        if !request.involves(actor) && !ApprovalEngine::is_admin(actor, admin_roles) {
            return Err(WorkflowError::denied(actor.id, "comment on this request"));
        }
        Ok(TimelineEntry::new(
            request.id,
            TimelineAction::Commented,
            Some(request.status),
            request.status,
            now,
        )
        .by(actor.id, actor.name.clone())
        .with_details(Some(text)))
    }

    /// Derives the in-flight status from live step states.
    ///
    /// Precedence: everything approved, an escalated step in the active
    /// stage, a partly approved active stage, an earlier stage approved,
    /// otherwise pending.
    #[must_use]
    pub fn derive_status(request: &WorkflowRequest) -> RequestStatus {
        if !request.steps.is_empty()
            && request
                .steps
                .iter()
                .all(|s| s.status == StepStatus::Approved)
        {
            return RequestStatus::Approved;
        }

        let stage: Vec<_> = request.stage(request.current_step).collect();
        if stage.iter().any(|s| s.status == StepStatus::Escalated) {
            return RequestStatus::Escalated;
        }
        let approved = stage
            .iter()
            .filter(|s| s.status == StepStatus::Approved)
            .count();
        if approved >= 1 && approved < stage.len() {
            return RequestStatus::PartiallyApproved;
        }
        let earlier_approved = request
            .steps
            .iter()
            .any(|s| s.order < request.current_step && s.status == StepStatus::Approved);
        if earlier_approved {
            RequestStatus::InReview
        } else {
            RequestStatus::Pending
        }
    }

    /// Check if a status transition is valid.
    ///
    /// Active statuses may also "move" to themselves, e.g. approving a
    /// later stage keeps `in_review`.
    #[must_use]
    pub fn is_valid_transition(from: RequestStatus, to: RequestStatus) -> bool {
        use RequestStatus::{
            Approved, Cancelled, Completed, Draft, Escalated, InReview, PartiallyApproved,
            Pending, Rejected, Returned,
        };
        if from == to {
            return from.is_actionable();
        }
        matches!(
            (from, to),
            (Draft, Pending | Cancelled)
                | (
                    Pending | InReview | PartiallyApproved,
                    InReview
                        | PartiallyApproved
                        | Approved
                        | Rejected
                        | Returned
                        | Cancelled
                        | Escalated
                )
                | (
                    Escalated,
                    InReview | PartiallyApproved | Approved | Rejected | Returned
                )
                | (Returned, Pending)
                | (Approved, Completed)
        )
    }

    fn materialize(
        id: RequestId,
        new: NewRequest,
        steps: Vec<ApprovalStep>,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> WorkflowRequest {
        WorkflowRequest {
            id,
            tenant_id: new.tenant_id,
            requester_id: new.requester.id,
            requester_name: new.requester.name,
            title: new.title.trim().to_string(),
            payload: new.payload,
            status,
            current_step: 0,
            priority: new.priority,
            due_date: new.due_date,
            version: 0,
            created_at: now,
            updated_at: now,
            steps: steps
                .into_iter()
                .map(|mut s| {
                    s.request_id = id;
                    s
                })
                .collect(),
        }
    }

    /// Locates a step an approver may act on right now.
    ///
    /// Checks run in order: the step exists, it is active in the current
    /// stage, the request accepts decisions, the actor is authorized.
    fn actionable_step(
        request: &WorkflowRequest,
        step_id: StepId,
        actor: &Actor,
        operation: &str,
    ) -> Result<usize, WorkflowError> {
        let index = request
            .step_index(step_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Step {step_id}")))?;
        let step = &request.steps[index];

        if !step.status.is_active() || step.order != request.current_step {
            return Err(WorkflowError::InvalidStepState {
                step_id,
                status: step.status,
            });
        }
        if !request.status.is_actionable() {
            return Err(WorkflowError::transition(request.status, operation));
        }
        if actor.id == request.requester_id {
            return Err(WorkflowError::denied(
                actor.id,
                format!("{operation} their own request"),
            ));
        }
        ApprovalEngine::authorize_step(step, actor)?;
        Ok(index)
    }

    fn set_status(
        request: &mut WorkflowRequest,
        to: RequestStatus,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        if !Self::is_valid_transition(request.status, to) {
            return Err(WorkflowError::transition(request.status, operation));
        }
        request.status = to;
        request.updated_at = now;
        Ok(())
    }

    fn approval_requests(request: &WorkflowRequest) -> Vec<NotificationEvent> {
        request
            .active_steps()
            .filter_map(|s| s.approver_id.map(|to| (s.id, to)))
            .map(|(step_id, to)| {
                NotificationEvent::new(
                    request.id,
                    to,
                    NotificationKind::ApprovalRequested,
                    json!({
                        "title": request.title,
                        "requester": request.requester_name,
                        "step_id": step_id,
                        "priority": request.priority,
                    }),
                )
            })
            .collect()
    }

    fn to_requester(
        request: &WorkflowRequest,
        kind: NotificationKind,
        comment: Option<&str>,
    ) -> NotificationEvent {
        NotificationEvent::new(
            request.id,
            request.requester_id,
            kind,
            json!({
                "title": request.title,
                "status": request.status,
                "comment": comment,
            }),
        )
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn require_comment(comment: Option<String>, what: &str) -> Result<String, WorkflowError> {
    normalize_comment(comment)
        .ok_or_else(|| WorkflowError::Validation(format!("a {what} comment is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::resolver::StepSpec;
    use crate::workflow::test_fixtures::{Fixture, actor};

    #[test]
    fn test_create_activates_first_stage() {
        let fx = Fixture::sequential(3);
        let t = fx.create();

        assert_eq!(t.request.status, RequestStatus::Pending);
        assert_eq!(t.request.current_step, 0);
        assert_eq!(t.request.steps[0].status, StepStatus::Pending);
        assert!(t.request.steps[0].became_pending_at.is_some());
        assert_eq!(t.request.steps[1].status, StepStatus::Waiting);
        assert_eq!(t.entry.action, TimelineAction::Created);
        assert_eq!(t.entry.from_status, None);
        // Role-assigned steps have nobody to address directly.
        assert!(t.notifications.is_empty());
    }

    #[test]
    fn test_create_notifies_named_approver() {
        let manager = actor("Mia Manager", &[]);
        let fx = Fixture::with_specs(vec![
            StepSpec::user(0, manager.id, manager.name.clone()),
            StepSpec::role(1, "finance"),
        ]);
        let t = fx.create();

        assert_eq!(t.notifications.len(), 1);
        assert_eq!(t.notifications[0].kind, NotificationKind::ApprovalRequested);
        assert_eq!(t.notifications[0].to_user_id, manager.id);
    }

    #[test]
    fn test_sequential_chain_advances_stage_by_stage() {
        let fx = Fixture::sequential(3);
        let mut request = fx.create().request;

        for expected_step in 1..=2 {
            let step_id = request.steps[expected_step - 1].id;
            let approver = fx.approver(expected_step - 1);
            let t = WorkflowService::approve(request, step_id, &approver, None, fx.now).unwrap();
            assert_eq!(t.request.status, RequestStatus::InReview);
            assert_eq!(t.request.current_step as usize, expected_step);
            request = t.request;
        }

        let last = request.steps[2].id;
        let t = WorkflowService::approve(request, last, &fx.approver(2), None, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::Approved);
        assert_eq!(t.notifications[0].kind, NotificationKind::RequestApproved);
    }

    #[test]
    fn test_parallel_group_reports_partial_approval() {
        let fx = Fixture::parallel(2);
        let request = fx.create().request;
        let (a, b) = (request.steps[0].id, request.steps[1].id);

        let t = WorkflowService::approve(request, a, &fx.approver(0), None, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::PartiallyApproved);
        assert_eq!(t.request.current_step, 0);

        let t = WorkflowService::approve(t.request, b, &fx.approver(1), None, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::Approved);
    }

    #[test]
    fn test_second_approval_is_invalid_step_state() {
        let fx = Fixture::sequential(2);
        let request = fx.create().request;
        let step_id = request.steps[0].id;
        let approver = fx.approver(0);

        let t = WorkflowService::approve(request, step_id, &approver, None, fx.now).unwrap();
        let err =
            WorkflowService::approve(t.request.clone(), step_id, &approver, None, fx.now)
                .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidStepState {
                step_id,
                status: StepStatus::Approved
            }
        );
    }

    #[test]
    fn test_waiting_step_cannot_be_approved() {
        let fx = Fixture::sequential(2);
        let request = fx.create().request;
        let later = request.steps[1].id;
        let err =
            WorkflowService::approve(request, later, &fx.approver(1), None, fx.now).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidStepState {
                status: StepStatus::Waiting,
                ..
            }
        ));
    }

    #[test]
    fn test_unauthorized_actor_is_denied() {
        let fx = Fixture::sequential(1);
        let request = fx.create().request;
        let step_id = request.steps[0].id;
        let stranger = actor("Stranger", &["intern"]);
        let err =
            WorkflowService::approve(request.clone(), step_id, &stranger, None, fx.now)
                .unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");

        let err = WorkflowService::approve(request, step_id, &fx.requester, None, fx.now)
            .unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
    }

    #[test]
    fn test_reject_requires_comment_and_skips_the_rest() {
        let fx = Fixture::sequential(3);
        let request = fx.create().request;
        let step0 = request.steps[0].id;
        let t = WorkflowService::approve(request, step0, &fx.approver(0), None, fx.now).unwrap();
        let step1 = t.request.steps[1].id;

        let err = WorkflowService::reject(
            t.request.clone(),
            step1,
            &fx.approver(1),
            Some("  ".into()),
            fx.now,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let t = WorkflowService::reject(
            t.request,
            step1,
            &fx.approver(1),
            Some("over budget".into()),
            fx.now,
        )
        .unwrap();
        assert_eq!(t.request.status, RequestStatus::Rejected);
        assert_eq!(t.request.steps[0].status, StepStatus::Approved);
        assert_eq!(t.request.steps[1].status, StepStatus::Rejected);
        assert_eq!(t.request.steps[2].status, StepStatus::Skipped);
        assert_eq!(t.entry.details.as_deref(), Some("over budget"));
    }

    #[test]
    fn test_return_restart_resets_everything() {
        let fx = Fixture::sequential(3);
        let request = fx.create().request;
        let step0 = request.steps[0].id;
        let t = WorkflowService::approve(request, step0, &fx.approver(0), None, fx.now).unwrap();
        let step1 = t.request.steps[1].id;

        let t = WorkflowService::return_for_correction(
            t.request,
            step1,
            &fx.approver(1),
            Some("attach receipt".into()),
            ReturnPolicy::Restart,
            fx.now,
        )
        .unwrap();
        assert_eq!(t.request.status, RequestStatus::Returned);
        assert_eq!(t.request.current_step, 0);
        assert!(t.request.steps.iter().all(|s| s.status == StepStatus::Waiting));
        assert!(t.request.steps[0].acted_by.is_none());

        let t = WorkflowService::resubmit(t.request, &fx.requester, None, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::Pending);
        assert_eq!(t.request.steps[0].status, StepStatus::Pending);
    }

    #[test]
    fn test_return_resume_keeps_earlier_approvals() {
        let fx = Fixture::sequential(3);
        let request = fx.create().request;
        let step0 = request.steps[0].id;
        let t = WorkflowService::approve(request, step0, &fx.approver(0), None, fx.now).unwrap();
        let step1 = t.request.steps[1].id;

        let t = WorkflowService::return_for_correction(
            t.request,
            step1,
            &fx.approver(1),
            Some("wrong cost center".into()),
            ReturnPolicy::Resume,
            fx.now,
        )
        .unwrap();
        assert_eq!(t.request.current_step, 1);
        assert_eq!(t.request.steps[0].status, StepStatus::Approved);
        assert_eq!(t.request.steps[1].status, StepStatus::Waiting);

        let t = WorkflowService::resubmit(t.request, &fx.requester, None, fx.now).unwrap();
        assert_eq!(t.request.steps[1].status, StepStatus::Pending);
        assert_eq!(t.request.steps[0].status, StepStatus::Approved);
    }

    #[test]
    fn test_only_requester_resubmits() {
        let fx = Fixture::sequential(1);
        let request = fx.create().request;
        let step0 = request.steps[0].id;
        let t = WorkflowService::return_for_correction(
            request,
            step0,
            &fx.approver(0),
            Some("typo".into()),
            ReturnPolicy::Restart,
            fx.now,
        )
        .unwrap();
        let err =
            WorkflowService::resubmit(t.request, &fx.approver(0), None, fx.now).unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
    }

    #[test]
    fn test_cancel_rules() {
        let fx = Fixture::sequential(2);
        let request = fx.create().request;
        let admin = actor("Ada", &["admin"]);
        let admin_roles = vec!["admin".to_string()];

        let err = WorkflowService::cancel(request.clone(), &fx.approver(0), &admin_roles, fx.now)
            .unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");

        let t = WorkflowService::cancel(request, &admin, &admin_roles, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::Cancelled);
        assert!(t.request.steps.iter().all(|s| s.status == StepStatus::Skipped));

        let err = WorkflowService::cancel(t.request, &fx.requester, &admin_roles, fx.now)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_cancel_after_approval_is_invalid() {
        let fx = Fixture::sequential(1);
        let request = fx.create().request;
        let step0 = request.steps[0].id;
        let t = WorkflowService::approve(request, step0, &fx.approver(0), None, fx.now).unwrap();
        let err = WorkflowService::cancel(t.request, &fx.requester, &[], fx.now).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::transition(RequestStatus::Approved, "cancel")
        );
    }

    #[test]
    fn test_complete_requires_admin_and_approval() {
        let fx = Fixture::sequential(1);
        let admin = actor("Ada", &["admin"]);
        let admin_roles = vec!["admin".to_string()];
        let request = fx.create().request;

        let err = WorkflowService::complete(request.clone(), &admin, &admin_roles, fx.now)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");

        let step0 = request.steps[0].id;
        let t = WorkflowService::approve(request, step0, &fx.approver(0), None, fx.now).unwrap();
        let err =
            WorkflowService::complete(t.request.clone(), &fx.requester, &admin_roles, fx.now)
                .unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");

        let t = WorkflowService::complete(t.request, &admin, &admin_roles, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::Completed);
    }

    #[test]
    fn test_escalate_reassigns_to_fallback_role() {
        let fx = Fixture::sequential(1).with_timeout(24);
        let request = fx.create().request;
        let step_id = request.steps[0].id;

        let early = fx.now + chrono::Duration::hours(24);
        assert!(
            WorkflowService::escalate(request.clone(), step_id, "admin", early)
                .unwrap()
                .is_none()
        );

        let late = early + chrono::Duration::minutes(1);
        let t = WorkflowService::escalate(request, step_id, "Admin", late)
            .unwrap()
            .unwrap();
        let step = &t.request.steps[0];
        assert_eq!(step.status, StepStatus::Escalated);
        assert_eq!(step.approver_role.as_deref(), Some("admin"));
        assert_eq!(step.became_pending_at, Some(late));
        assert_eq!(t.request.status, RequestStatus::Escalated);
        assert!(t.entry.actor_id.is_none());
        assert!(t.entry.details.unwrap().contains("role approver-0"));

        assert!(
            WorkflowService::escalate(t.request, step_id, "admin", late + chrono::Duration::days(9))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_escalation_never_targets_the_requester() {
        let fx = Fixture::sequential(1).with_timeout(1);
        let mut request = fx.create().request;
        // Rows written before the chain check existed may still carry this.
        request.steps[0].escalate_to = Some(fx.requester.id);
        let step_id = request.steps[0].id;

        let late = fx.now + chrono::Duration::hours(2);
        let t = WorkflowService::escalate(request, step_id, "admin", late)
            .unwrap()
            .unwrap();
        let step = &t.request.steps[0];
        assert_eq!(step.approver_id, None);
        assert_eq!(step.approver_role.as_deref(), Some("admin"));
        assert!(t.notifications.is_empty());

        let admin = actor("Ada", &["admin"]);
        let t = WorkflowService::approve(t.request, step_id, &admin, None, late).unwrap();
        assert_eq!(t.request.status, RequestStatus::Approved);
    }

    #[test]
    fn test_restart_restores_assignment_before_escalation() {
        let fx = Fixture::sequential(2).with_timeout(1);
        let request = fx.create().request;
        let step_id = request.steps[0].id;
        let late = fx.now + chrono::Duration::hours(2);
        let t = WorkflowService::escalate(request, step_id, "admin", late)
            .unwrap()
            .unwrap();
        let original = t.request.steps[0].escalated_from.clone().unwrap();
        assert_eq!(original.approver_role.as_deref(), Some("approver-0"));

        let admin = actor("Ada", &["admin"]);
        let t = WorkflowService::return_for_correction(
            t.request,
            step_id,
            &admin,
            Some("wrong cost center".into()),
            ReturnPolicy::Restart,
            late,
        )
        .unwrap();
        let step = &t.request.steps[0];
        assert_eq!(step.approver_role.as_deref(), Some("approver-0"));
        assert_eq!(step.escalated_from, None);

        let t = WorkflowService::resubmit(t.request, &fx.requester, None, late).unwrap();
        assert!(t.request.steps[0].is_assigned_to(&fx.approver(0)));
        assert!(!t.request.steps[0].is_assigned_to(&admin));
    }

    #[test]
    fn test_escalated_sibling_outranks_partial_approval() {
        let fx = Fixture::parallel(2).with_timeout(1);
        let request = fx.create().request;
        let (a, b) = (request.steps[0].id, request.steps[1].id);

        let t = WorkflowService::approve(request, a, &fx.approver(0), None, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::PartiallyApproved);

        let late = fx.now + chrono::Duration::hours(2);
        let t = WorkflowService::escalate(t.request, b, "admin", late)
            .unwrap()
            .unwrap();
        assert_eq!(t.request.status, RequestStatus::Escalated);
        assert_eq!(WorkflowService::derive_status(&t.request), RequestStatus::Escalated);

        let admin = actor("Ada", &["admin"]);
        let t = WorkflowService::approve(t.request, b, &admin, None, late).unwrap();
        assert_eq!(t.request.status, RequestStatus::Approved);
    }

    #[test]
    fn test_escalated_step_can_be_approved_by_fallback() {
        let fx = Fixture::sequential(2).with_timeout(1);
        let request = fx.create().request;
        let step_id = request.steps[0].id;
        let late = fx.now + chrono::Duration::hours(2);
        let t = WorkflowService::escalate(request, step_id, "admin", late)
            .unwrap()
            .unwrap();

        let admin = actor("Ada", &["admin"]);
        let t = WorkflowService::approve(t.request, step_id, &admin, None, late).unwrap();
        assert_eq!(t.request.status, RequestStatus::InReview);
        assert_eq!(t.request.current_step, 1);
    }

    #[test]
    fn test_comment_requires_participant() {
        let fx = Fixture::sequential(1);
        let request = fx.create().request;

        let entry =
            WorkflowService::comment(&request, &fx.approver(0), "looks fine", &[], fx.now)
                .unwrap();
        assert_eq!(entry.action, TimelineAction::Commented);
        assert_eq!(entry.from_status, Some(RequestStatus::Pending));
        assert_eq!(entry.to_status, RequestStatus::Pending);

        let err = WorkflowService::comment(&request, &actor("Eve", &[]), "hi", &[], fx.now)
            .unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
    }

    #[test]
    fn test_draft_then_submit() {
        let fx = Fixture::sequential(2);
        let t = fx.draft();
        assert_eq!(t.request.status, RequestStatus::Draft);
        assert!(t.request.steps.iter().all(|s| s.status == StepStatus::Waiting));

        let err = WorkflowService::submit(t.request.clone(), &fx.approver(0), fx.now).unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");

        let t = WorkflowService::submit(t.request, &fx.requester, fx.now).unwrap();
        assert_eq!(t.request.status, RequestStatus::Pending);
        assert_eq!(t.entry.action, TimelineAction::Submitted);
        assert_eq!(t.entry.from_status, Some(RequestStatus::Draft));
        assert_eq!(t.request.steps[0].status, StepStatus::Pending);
    }

    #[test]
    fn test_is_valid_transition() {
        use RequestStatus::*;
        assert!(WorkflowService::is_valid_transition(Draft, Pending));
        assert!(WorkflowService::is_valid_transition(Pending, PartiallyApproved));
        assert!(WorkflowService::is_valid_transition(InReview, InReview));
        assert!(WorkflowService::is_valid_transition(Escalated, Escalated));
        assert!(WorkflowService::is_valid_transition(Returned, Pending));
        assert!(WorkflowService::is_valid_transition(Approved, Completed));

        assert!(!WorkflowService::is_valid_transition(Escalated, Cancelled));
        assert!(!WorkflowService::is_valid_transition(Approved, Cancelled));
        assert!(!WorkflowService::is_valid_transition(Rejected, Rejected));
        assert!(!WorkflowService::is_valid_transition(Draft, Approved));
        for status in RequestStatus::ALL {
            if status.is_terminal() {
                for to in RequestStatus::ALL {
                    assert!(!WorkflowService::is_valid_transition(*status, *to));
                }
            }
        }
    }

    #[test]
    fn test_return_policy_parse() {
        assert_eq!("Resume".parse::<ReturnPolicy>().unwrap(), ReturnPolicy::Resume);
        assert!("rewind".parse::<ReturnPolicy>().is_err());
    }
}
