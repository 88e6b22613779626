//! Step graph validation and normalization at submission time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use flowgate_shared::types::{RequestId, StepId, UserId};

use crate::workflow::approval::ApprovalPolicy;
use crate::workflow::error::WorkflowError;
use crate::workflow::types::{Actor, ApprovalStep, ExecutionMode, RequestPayload, StepStatus};

/// Longest timeout a step may carry (one year).
pub const MAX_TIMEOUT_HOURS: u32 = 8_760;

/// A caller-supplied approval step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Stage number. Lists may be 0- or 1-based.
    pub order: u32,
    /// Role allowed to act.
    #[serde(default)]
    pub approver_role: Option<String>,
    /// User allowed to act.
    #[serde(default)]
    pub approver_id: Option<UserId>,
    /// Display name of the approver.
    #[serde(default)]
    pub approver_name: Option<String>,
    /// Sequential or parallel.
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Hours before escalation.
    #[serde(default)]
    pub timeout_hours: Option<u32>,
    /// Explicit fallback approver.
    #[serde(default)]
    pub escalate_to: Option<UserId>,
    /// Display name of the fallback approver.
    #[serde(default)]
    pub escalate_to_name: Option<String>,
}

impl StepSpec {
    /// A sequential step assigned to a role.
    #[must_use]
    pub fn role(order: u32, role: impl Into<String>) -> Self {
        Self {
            order,
            approver_role: Some(role.into()),
            approver_id: None,
            approver_name: None,
            execution_mode: ExecutionMode::Sequential,
            timeout_hours: None,
            escalate_to: None,
            escalate_to_name: None,
        }
    }

    /// A sequential step assigned to a person.
    #[must_use]
    pub fn user(order: u32, id: UserId, name: impl Into<String>) -> Self {
        Self {
            approver_id: Some(id),
            approver_name: Some(name.into()),
            approver_role: None,
            ..Self::role(order, "")
        }
    }

    /// Marks the step as a member of a parallel group.
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.execution_mode = ExecutionMode::Parallel;
        self
    }

    /// Sets the escalation timeout.
    #[must_use]
    pub fn timeout(mut self, hours: u32) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    /// Sets the explicit escalation target.
    #[must_use]
    pub fn escalate_to(mut self, id: UserId, name: impl Into<String>) -> Self {
        self.escalate_to = Some(id);
        self.escalate_to_name = Some(name.into());
        self
    }
}

/// Where the approval chain comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSource {
    /// The caller supplied the chain.
    Supplied(Vec<StepSpec>),
    /// Compute the chain from the approval policy.
    DefaultChain,
}

/// Validates and normalizes approval chains.
#[derive(Debug, Clone, Default)]
pub struct StepResolver {
    policy: ApprovalPolicy,
    augment_supplied: bool,
}

impl StepResolver {
    /// Creates a resolver over `policy`.
    #[must_use]
    pub fn new(policy: ApprovalPolicy, augment_supplied: bool) -> Self {
        Self {
            policy,
            augment_supplied,
        }
    }

    /// The policy tiers are drawn from.
    #[must_use]
    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Validates the payload and chain, returning materialized waiting steps.
    ///
    /// Nothing is persisted; every structural defect is a
    /// [`WorkflowError::Validation`].
    pub fn resolve(
        &self,
        request_id: RequestId,
        requester: &Actor,
        payload: &RequestPayload,
        source: StepSource,
    ) -> Result<Vec<ApprovalStep>, WorkflowError> {
        payload.validate()?;

        let mut specs = match source {
            StepSource::Supplied(specs) => {
                let mut specs = normalize(specs, requester)?;
                if self.augment_supplied {
                    self.append_missing_tiers(&mut specs, payload);
                }
                specs
            }
            StepSource::DefaultChain => {
                let mut specs = Vec::new();
                self.append_missing_tiers(&mut specs, payload);
                if specs.is_empty() {
                    return Err(WorkflowError::Validation(format!(
                        "no approval tier applies to {} requests of this size; supply steps",
                        payload.request_type()
                    )));
                }
                specs
            }
        };

        specs.sort_by_key(|s| s.order);
        Ok(specs
            .into_iter()
            .map(|spec| materialize(request_id, spec))
            .collect())
    }

    fn append_missing_tiers(&self, specs: &mut Vec<StepSpec>, payload: &RequestPayload) {
        for tier in self.policy.required_tiers(payload) {
            let role = tier.required_role.trim().to_lowercase();
            let covered = specs
                .iter()
                .any(|s| s.approver_role.as_deref() == Some(role.as_str()));
            if covered {
                continue;
            }
            let order = specs.iter().map(|s| s.order + 1).max().unwrap_or(0);
            let mut spec = StepSpec::role(order, role);
            spec.timeout_hours = tier.timeout_hours;
            specs.push(spec);
        }
    }
}

/// Checks each step and rewrites orders to a contiguous 0-based sequence.
fn normalize(specs: Vec<StepSpec>, requester: &Actor) -> Result<Vec<StepSpec>, WorkflowError> {
    if specs.is_empty() {
        return Err(WorkflowError::Validation(
            "at least one approval step is required".to_string(),
        ));
    }

    let mut stages: BTreeMap<u32, Vec<StepSpec>> = BTreeMap::new();
    for (index, mut spec) in specs.into_iter().enumerate() {
        spec.approver_role = spec
            .approver_role
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty());

        if spec.approver_id.is_none() && spec.approver_role.is_none() {
            return Err(WorkflowError::Validation(format!(
                "step {index} has neither an approver nor an approver role"
            )));
        }
        if spec.approver_id == Some(requester.id) {
            return Err(WorkflowError::Validation(format!(
                "step {index} names the requester as approver"
            )));
        }
        if spec.escalate_to == Some(requester.id) {
            return Err(WorkflowError::Validation(format!(
                "step {index} escalates to the requester"
            )));
        }
        if let Some(hours) = spec.timeout_hours
            && !(1..=MAX_TIMEOUT_HOURS).contains(&hours)
        {
            return Err(WorkflowError::Validation(format!(
                "step {index} timeout must be between 1 and {MAX_TIMEOUT_HOURS} hours"
            )));
        }
        stages.entry(spec.order).or_default().push(spec);
    }

    // 1-based lists are accepted and shifted down.
    let base = stages.keys().next().copied().unwrap_or(0);
    if base > 1 {
        return Err(WorkflowError::Validation(format!(
            "step orders must start at 0 or 1, found {base}"
        )));
    }

    let mut normalized = Vec::new();
    for (expected, (order, members)) in stages.into_iter().enumerate() {
        let stage = order - base;
        if u32::try_from(expected).ok() != Some(stage) {
            return Err(WorkflowError::Validation(format!(
                "step orders have a gap before {order}"
            )));
        }
        if members.len() > 1
            && members
                .iter()
                .any(|m| m.execution_mode != ExecutionMode::Parallel)
        {
            return Err(WorkflowError::Validation(format!(
                "steps sharing order {order} must all be parallel"
            )));
        }
        normalized.extend(members.into_iter().map(|mut m| {
            m.order = stage;
            m
        }));
    }
    Ok(normalized)
}

fn materialize(request_id: RequestId, spec: StepSpec) -> ApprovalStep {
    ApprovalStep {
        id: StepId::new(),
        request_id,
        order: spec.order,
        approver_role: spec.approver_role,
        approver_id: spec.approver_id,
        approver_name: spec.approver_name,
        status: StepStatus::Waiting,
        execution_mode: spec.execution_mode,
        timeout_hours: spec.timeout_hours,
        escalate_to: spec.escalate_to,
        escalate_to_name: spec.escalate_to_name,
        comments: None,
        action_date: None,
        acted_by: None,
        became_pending_at: None,
        escalated_from: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn requester() -> Actor {
        Actor::new(UserId::new(), "Rita")
    }

    fn expense(amount: rust_decimal::Decimal) -> RequestPayload {
        RequestPayload::Expense {
            amount,
            currency: "USD".to_string(),
            category: "travel".to_string(),
        }
    }

    fn resolver() -> StepResolver {
        StepResolver::new(ApprovalPolicy::default_tiers(), true)
    }

    #[test]
    fn test_empty_supplied_list_is_rejected() {
        let err = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(10)),
                StepSource::Supplied(vec![]),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_one_based_orders_are_shifted() {
        let steps = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(10)),
                StepSource::Supplied(vec![
                    StepSpec::role(2, "Director"),
                    StepSpec::role(1, "manager"),
                ]),
            )
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].order, 0);
        assert_eq!(steps[0].approver_role.as_deref(), Some("manager"));
        assert_eq!(steps[1].order, 1);
        assert_eq!(steps[1].approver_role.as_deref(), Some("director"));
        assert!(steps.iter().all(|s| s.status == StepStatus::Waiting));
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(10)),
                StepSource::Supplied(vec![StepSpec::role(0, "a"), StepSpec::role(2, "b")]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("gap"));
    }

    #[test]
    fn test_shared_order_must_be_parallel() {
        let err = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(10)),
                StepSource::Supplied(vec![
                    StepSpec::role(0, "legal").parallel(),
                    StepSpec::role(0, "security"),
                ]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("parallel"));

        let ok = resolver().resolve(
            RequestId::new(),
            &requester(),
            &expense(dec!(10)),
            StepSource::Supplied(vec![
                StepSpec::role(0, "legal").parallel(),
                StepSpec::role(0, "security").parallel(),
            ]),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_step_needs_an_approver() {
        let err = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(10)),
                StepSource::Supplied(vec![StepSpec::role(0, "   ")]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("approver"));
    }

    #[test]
    fn test_self_approval_is_rejected() {
        let rita = requester();
        let err = resolver()
            .resolve(
                RequestId::new(),
                &rita,
                &expense(dec!(10)),
                StepSource::Supplied(vec![StepSpec::user(0, rita.id, "Rita")]),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_escalation_to_requester_is_rejected() {
        let rita = requester();
        let err = resolver()
            .resolve(
                RequestId::new(),
                &rita,
                &expense(dec!(10)),
                StepSource::Supplied(vec![
                    StepSpec::role(0, "manager")
                        .timeout(24)
                        .escalate_to(rita.id, "Rita"),
                ]),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(msg) if msg.contains("escalates")));
    }

    #[test]
    fn test_timeout_bounds() {
        for hours in [0, MAX_TIMEOUT_HOURS + 1] {
            let result = resolver().resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(10)),
                StepSource::Supplied(vec![StepSpec::role(0, "manager").timeout(hours)]),
            );
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_missing_tiers_are_appended() {
        let steps = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(25000)),
                StepSource::Supplied(vec![
                    StepSpec::role(0, "manager"),
                    StepSpec::role(1, "finance"),
                ]),
            )
            .unwrap();
        let roles: Vec<_> = steps
            .iter()
            .map(|s| (s.order, s.approver_role.clone().unwrap()))
            .collect();
        assert_eq!(
            roles,
            vec![
                (0, "manager".to_string()),
                (1, "finance".to_string()),
                (2, "director".to_string()),
            ]
        );
        assert_eq!(steps[2].timeout_hours, Some(72));
    }

    #[test]
    fn test_augmentation_can_be_disabled() {
        let steps = StepResolver::new(ApprovalPolicy::default_tiers(), false)
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(25000)),
                StepSource::Supplied(vec![StepSpec::role(0, "manager")]),
            )
            .unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_default_chain() {
        let steps = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(5000)),
                StepSource::DefaultChain,
            )
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].approver_role.as_deref(), Some("finance"));

        let err = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(5)),
                StepSource::DefaultChain,
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_invalid_payload_fails_before_chain_checks() {
        let err = resolver()
            .resolve(
                RequestId::new(),
                &requester(),
                &expense(dec!(-5)),
                StepSource::Supplied(vec![StepSpec::role(0, "manager")]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("amount"));
    }
}
