//! Shared builders for workflow unit tests.

use chrono::{DateTime, TimeZone, Utc};

use flowgate_shared::types::{RequestId, TenantId, UserId};

use crate::workflow::approval::ApprovalPolicy;
use crate::workflow::resolver::{StepResolver, StepSource, StepSpec};
use crate::workflow::service::{Transition, WorkflowService};
use crate::workflow::types::{
    Actor, ApprovalStep, NewRequest, RequestPayload, RequestPriority,
};

/// Builds an actor holding `roles`.
pub(crate) fn actor(name: &str, roles: &[&str]) -> Actor {
    Actor::new(UserId::new(), name).with_roles(roles.iter().copied())
}

/// A requester plus a chain of role-assigned steps (`approver-{i}`).
pub(crate) struct Fixture {
    pub requester: Actor,
    pub now: DateTime<Utc>,
    pub specs: Vec<StepSpec>,
    pub tenant_id: TenantId,
}

impl Fixture {
    /// `n` sequential stages.
    pub fn sequential(n: u32) -> Self {
        Self::with_specs(
            (0..n)
                .map(|i| StepSpec::role(i, format!("approver-{i}")))
                .collect(),
        )
    }

    /// One parallel group of `n` siblings.
    pub fn parallel(n: u32) -> Self {
        Self::with_specs(
            (0..n)
                .map(|i| StepSpec::role(0, format!("approver-{i}")).parallel())
                .collect(),
        )
    }

    pub fn with_specs(specs: Vec<StepSpec>) -> Self {
        Self {
            requester: actor("Rita Requester", &["employee"]),
            now: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            specs,
            tenant_id: TenantId::new(),
        }
    }

    pub fn with_timeout(mut self, hours: u32) -> Self {
        for spec in &mut self.specs {
            spec.timeout_hours = Some(hours);
        }
        self
    }

    /// An actor holding the role of the `i`-th generated step.
    pub fn approver(&self, i: usize) -> Actor {
        let role = format!("approver-{i}");
        actor(&format!("Approver {i}"), &[role.as_str()])
    }

    pub fn payload(&self) -> RequestPayload {
        RequestPayload::General {
            description: "Standing desk".to_string(),
        }
    }

    pub fn new_request(&self) -> NewRequest {
        NewRequest {
            tenant_id: self.tenant_id,
            requester: self.requester.clone(),
            title: "Standing desk".to_string(),
            payload: self.payload(),
            priority: RequestPriority::Normal,
            due_date: None,
        }
    }

    pub fn source(&self) -> StepSource {
        StepSource::Supplied(self.specs.clone())
    }

    pub fn steps(&self, id: RequestId) -> Vec<ApprovalStep> {
        StepResolver::new(ApprovalPolicy::default(), false)
            .resolve(id, &self.requester, &self.payload(), self.source())
            .unwrap()
    }

    pub fn create(&self) -> Transition {
        let id = RequestId::new();
        WorkflowService::create(id, self.new_request(), self.steps(id), self.now)
    }

    pub fn draft(&self) -> Transition {
        let id = RequestId::new();
        WorkflowService::draft(id, self.new_request(), self.steps(id), self.now)
    }
}
