//! Workflow engine: the state machine wired to a store and a notifier.
//!
//! Every mutating operation runs the same loop: load the request, apply a
//! pure transition from [`WorkflowService`], commit it with compare-and-swap,
//! and retry from a fresh load when another writer won the race. Store
//! calls are bounded by a timeout. Notifications go out after commit and
//! their failures are only logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use flowgate_shared::types::{RequestId, StepId, UserId};
use flowgate_shared::{EscalationConfig, WorkflowConfig};

use crate::workflow::clock::{Clock, SystemClock};
use crate::workflow::error::WorkflowError;
use crate::workflow::notify::{NotificationEvent, Notifier};
use crate::workflow::resolver::{StepResolver, StepSource};
use crate::workflow::service::{ReturnPolicy, Transition, WorkflowService};
use crate::workflow::store::{RequestMutation, RequestStore, StoreError};
use crate::workflow::timeline::TimelineEntry;
use crate::workflow::types::{
    Actor, ApprovalStep, NewRequest, RequestStatus, StepAction, WorkflowRequest,
};

/// Tracing target for audit lines about side effects that failed after commit.
pub const AUDIT_TARGET: &str = "flowgate::audit";

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reload-and-recompute attempts after a version conflict.
    pub max_conflict_retries: u32,
    /// Upper bound for each store call.
    pub store_timeout: Duration,
    /// Upper bound for each notification.
    pub notify_timeout: Duration,
    /// Step reset behavior on return.
    pub return_policy: ReturnPolicy,
    /// Roles allowed to cancel, complete and comment on any request.
    pub admin_roles: Vec<String>,
    /// Role overdue steps fall back to when they name no target.
    pub fallback_role: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            store_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(2),
            return_policy: ReturnPolicy::Restart,
            admin_roles: vec!["admin".to_string()],
            fallback_role: "admin".to_string(),
        }
    }
}

impl EngineConfig {
    /// Builds the engine config from application settings.
    pub fn from_settings(
        workflow: &WorkflowConfig,
        escalation: &EscalationConfig,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            max_conflict_retries: workflow.max_conflict_retries,
            store_timeout: Duration::from_millis(workflow.store_timeout_ms),
            notify_timeout: Duration::from_millis(workflow.notify_timeout_ms),
            return_policy: workflow.return_policy.parse()?,
            admin_roles: workflow.admin_roles.clone(),
            fallback_role: escalation.fallback_role.clone(),
        })
    }
}

/// The approval workflow engine.
pub struct WorkflowEngine {
    store: Arc<dyn RequestStore>,
    notifier: Arc<dyn Notifier>,
    resolver: StepResolver,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Creates an engine on the system clock.
    pub fn new(
        store: Arc<dyn RequestStore>,
        notifier: Arc<dyn Notifier>,
        resolver: StepResolver,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            resolver,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time according to the engine's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Resolves the chain, creates the request and activates its first stage.
    pub async fn submit_request(
        &self,
        new: NewRequest,
        source: StepSource,
    ) -> Result<WorkflowRequest, WorkflowError> {
        self.insert(new, source, WorkflowService::create).await
    }

    /// Resolves the chain and stores the request as a draft.
    pub async fn save_draft(
        &self,
        new: NewRequest,
        source: StepSource,
    ) -> Result<WorkflowRequest, WorkflowError> {
        self.insert(new, source, WorkflowService::draft).await
    }

    /// Submits a saved draft.
    pub async fn submit_draft(
        &self,
        request_id: RequestId,
        actor: &Actor,
    ) -> Result<WorkflowRequest, WorkflowError> {
        self.mutate(request_id, "submit", None, |request, now| {
            WorkflowService::submit(request, actor, now)
        })
        .await
    }

    /// Approves, rejects or returns a step.
    pub async fn act_on_step(
        &self,
        request_id: RequestId,
        step_id: StepId,
        actor: &Actor,
        action: StepAction,
        comment: Option<String>,
    ) -> Result<WorkflowRequest, WorkflowError> {
        let policy = self.config.return_policy;
        self.mutate(request_id, action.as_str(), Some(step_id), |request, now| {
            WorkflowService::act(
                request,
                step_id,
                actor,
                action,
                comment.clone(),
                policy,
                now,
            )
        })
        .await
    }

    /// Cancels a request on behalf of its requester or an admin.
    pub async fn cancel_request(
        &self,
        request_id: RequestId,
        actor: &Actor,
    ) -> Result<WorkflowRequest, WorkflowError> {
        let admin_roles = &self.config.admin_roles;
        self.mutate(request_id, "cancel", None, |request, now| {
            WorkflowService::cancel(request, actor, admin_roles, now)
        })
        .await
    }

    /// Puts a returned request back into review.
    pub async fn resubmit_request(
        &self,
        request_id: RequestId,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<WorkflowRequest, WorkflowError> {
        self.mutate(request_id, "resubmit", None, |request, now| {
            WorkflowService::resubmit(request, actor, comment.clone(), now)
        })
        .await
    }

    /// Marks an approved request as fulfilled.
    pub async fn complete_request(
        &self,
        request_id: RequestId,
        actor: &Actor,
    ) -> Result<WorkflowRequest, WorkflowError> {
        let admin_roles = &self.config.admin_roles;
        self.mutate(request_id, "complete", None, |request, now| {
            WorkflowService::complete(request, actor, admin_roles, now)
        })
        .await
    }

    /// Appends a comment to the timeline without touching the request.
    ///
    /// The entry is stamped with the status it was read at, so a transition
    /// committing in between forces a reload like any other write.
    pub async fn add_comment(
        &self,
        request_id: RequestId,
        actor: &Actor,
        text: &str,
    ) -> Result<TimelineEntry, WorkflowError> {
        let mut attempt = 0;
        loop {
            let request = self.get_request(request_id).await?;
            let entry = WorkflowService::comment(
                &request,
                actor,
                text,
                &self.config.admin_roles,
                self.clock.now(),
            )?;
            match self
                .bounded(self.store.append_timeline(request.version, entry))
                .await
            {
                Ok(entry) => {
                    tracing::info!(
                        request_id = %request_id,
                        actor_id = %actor.id,
                        action = "comment",
                        status = %request.status,
                        "comment recorded"
                    );
                    return Ok(entry);
                }
                Err(err) => self.on_commit_error(err, request_id, &mut attempt)?,
            }
        }
    }

    /// Escalates an overdue step. `Ok(None)` means there was nothing to do.
    ///
    /// The overdue condition is re-checked against freshly loaded state on
    /// every attempt, so a step resolved in the meantime is left alone.
    pub async fn escalate_step(
        &self,
        request_id: RequestId,
        step_id: StepId,
    ) -> Result<Option<WorkflowRequest>, WorkflowError> {
        let fallback = self.config.fallback_role.as_str();
        let mut attempt = 0;
        loop {
            let request = self.get_request(request_id).await?;
            let version = request.version;
            let Some(transition) =
                WorkflowService::escalate(request, step_id, fallback, self.clock.now())?
            else {
                return Ok(None);
            };
            match self.commit(request_id, version, transition).await {
                Ok(request) => {
                    tracing::info!(
                        request_id = %request_id,
                        step_id = %step_id,
                        action = "escalate",
                        status = %request.status,
                        version = request.version,
                        "step escalated"
                    );
                    return Ok(Some(request));
                }
                Err(err) => self.on_commit_error(err, request_id, &mut attempt)?,
            }
        }
    }

    /// Loads a request.
    pub async fn get_request(&self, request_id: RequestId) -> Result<WorkflowRequest, WorkflowError> {
        Ok(self.bounded(self.store.get_request(request_id)).await?)
    }

    /// Full timeline, oldest first.
    pub async fn timeline(&self, request_id: RequestId) -> Result<Vec<TimelineEntry>, WorkflowError> {
        Ok(self.bounded(self.store.timeline(request_id)).await?)
    }

    /// The `limit` most recent entries, newest first.
    pub async fn latest_timeline(
        &self,
        request_id: RequestId,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, WorkflowError> {
        Ok(self
            .bounded(self.store.latest_timeline(request_id, limit))
            .await?)
    }

    /// Requests where `actor` can act right now, by person or by role.
    ///
    /// Most urgent first, then oldest first.
    pub async fn inbox(&self, actor: &Actor) -> Result<Vec<WorkflowRequest>, WorkflowError> {
        let mut requests = self
            .bounded(self.store.list_by_status(RequestStatus::ACTIVE))
            .await?;
        requests.retain(|r| r.awaits(actor));
        requests.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(requests)
    }

    /// Requests with a step assigned to `user_id`, optionally by status.
    pub async fn approver_history(
        &self,
        user_id: UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<WorkflowRequest>, WorkflowError> {
        Ok(self
            .bounded(self.store.list_by_approver(user_id, status))
            .await?)
    }

    /// Requests awaiting a decision, for the escalation sweep.
    pub async fn active_requests(&self) -> Result<Vec<WorkflowRequest>, WorkflowError> {
        Ok(self
            .bounded(self.store.list_by_status(RequestStatus::ACTIVE))
            .await?)
    }

    async fn insert(
        &self,
        new: NewRequest,
        source: StepSource,
        build: fn(RequestId, NewRequest, Vec<ApprovalStep>, DateTime<Utc>) -> Transition,
    ) -> Result<WorkflowRequest, WorkflowError> {
        if new.title.trim().is_empty() {
            return Err(WorkflowError::Validation("title is required".to_string()));
        }
        let id = RequestId::new();
        let steps = self
            .resolver
            .resolve(id, &new.requester, &new.payload, source)?;
        let Transition {
            request,
            entry,
            notifications,
        } = build(id, new, steps, self.clock.now());
        let action = entry.action;

        let stored = self
            .bounded(self.store.create_request(request, entry))
            .await
            .inspect_err(|e| tracing::error!(request_id = %id, error = %e, "create failed"))?;
        tracing::info!(
            request_id = %stored.id,
            action = %action,
            status = %stored.status,
            request_type = %stored.request_type(),
            steps = stored.steps.len(),
            "request created"
        );
        self.dispatch(notifications).await;
        Ok(stored)
    }

    /// Load, transition, compare-and-swap; retry on version conflicts.
    async fn mutate<F>(
        &self,
        request_id: RequestId,
        action: &str,
        step_id: Option<StepId>,
        mut apply: F,
    ) -> Result<WorkflowRequest, WorkflowError>
    where
        F: FnMut(WorkflowRequest, DateTime<Utc>) -> Result<Transition, WorkflowError> + Send,
    {
        let mut attempt = 0;
        loop {
            let request = self.get_request(request_id).await?;
            let version = request.version;
            let transition = apply(request, self.clock.now())?;

            match self.commit(request_id, version, transition).await {
                Ok(request) => {
                    tracing::info!(
                        request_id = %request_id,
                        step_id = ?step_id,
                        action,
                        status = %request.status,
                        current_step = request.current_step,
                        version = request.version,
                        "transition committed"
                    );
                    return Ok(request);
                }
                Err(err) => self.on_commit_error(err, request_id, &mut attempt)?,
            }
        }
    }

    async fn commit(
        &self,
        request_id: RequestId,
        version: i64,
        transition: Transition,
    ) -> Result<WorkflowRequest, StoreError> {
        let Transition {
            request,
            entry,
            notifications,
        } = transition;
        let stored = self
            .bounded(
                self.store
                    .compare_and_swap(request_id, version, RequestMutation { request, entry }),
            )
            .await?;
        self.dispatch(notifications).await;
        Ok(stored)
    }

    /// Decides whether a failed commit is retried; returns the error otherwise.
    fn on_commit_error(
        &self,
        err: StoreError,
        request_id: RequestId,
        attempt: &mut u32,
    ) -> Result<(), WorkflowError> {
        if let StoreError::VersionConflict {
            expected, actual, ..
        } = &err
            && *attempt < self.config.max_conflict_retries
        {
            *attempt += 1;
            tracing::warn!(
                request_id = %request_id,
                expected = *expected,
                actual = *actual,
                attempt = *attempt,
                "version conflict, reloading"
            );
            return Ok(());
        }
        if !matches!(err, StoreError::VersionConflict { .. }) {
            tracing::error!(request_id = %request_id, error = %err, "commit failed");
        }
        Err(err.into())
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        let limit = self.config.store_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
    }

    async fn dispatch(&self, notifications: Vec<NotificationEvent>) {
        for event in notifications {
            let request_id = event.request_id;
            let to_user_id = event.to_user_id;
            let kind = event.kind.as_str();
            let failure = match tokio::time::timeout(
                self.config.notify_timeout,
                self.notifier.notify(event),
            )
            .await
            {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("timed out after {:?}", self.config.notify_timeout),
            };
            tracing::warn!(
                request_id = %request_id,
                to_user_id = %to_user_id,
                kind,
                error = %failure,
                "notification failed"
            );
            tracing::warn!(
                target: AUDIT_TARGET,
                request_id = %request_id,
                to_user_id = %to_user_id,
                kind,
                "notification not delivered; transition kept"
            );
        }
    }
}
