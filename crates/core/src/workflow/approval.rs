//! Approval policy and authorization checks.
//!
//! Rules describe threshold tiers ("purchases of 10,000 or more need a
//! director"). The resolver turns matching tiers into extra stages; the
//! engine uses [`ApprovalEngine`] to decide who may act on a step.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::error::WorkflowError;
use crate::workflow::types::{Actor, ApprovalStep, RequestPayload, RequestType};

/// A threshold tier that requires an extra approver role.
///
/// Rules are matched by request type and by the payload's threshold value.
/// All matching rules apply, ordered by ascending priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    /// Unique identifier for the rule.
    pub id: Uuid,
    /// Human-readable name for the rule.
    pub name: String,
    /// Minimum value for this rule to apply (inclusive, None = no minimum).
    pub min_amount: Option<Decimal>,
    /// Maximum value for this rule to apply (inclusive, None = no maximum).
    pub max_amount: Option<Decimal>,
    /// Request types this rule applies to; empty matches every type.
    pub request_types: Vec<RequestType>,
    /// The role that must sign off matching requests.
    pub required_role: String,
    /// Stage ordering among matching rules (lower = earlier).
    pub priority: i16,
    /// Escalation timeout for the generated step.
    pub timeout_hours: Option<u32>,
}

impl ApprovalRule {
    /// Returns true if the rule applies to a request of `request_type`
    /// measured at `value`.
    ///
    /// A request without a threshold value only matches unbounded rules.
    #[must_use]
    pub fn matches(&self, request_type: RequestType, value: Option<Decimal>) -> bool {
        if !self.request_types.is_empty() && !self.request_types.contains(&request_type) {
            return false;
        }
        match value {
            Some(value) => {
                let above_min = self.min_amount.is_none_or(|min| value >= min);
                let below_max = self.max_amount.is_none_or(|max| value <= max);
                above_min && below_max
            }
            None => self.min_amount.is_none() && self.max_amount.is_none(),
        }
    }
}

/// A set of threshold tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Configured rules, in any order.
    pub rules: Vec<ApprovalRule>,
}

impl ApprovalPolicy {
    /// Creates a policy from rules.
    #[must_use]
    pub fn new(rules: Vec<ApprovalRule>) -> Self {
        Self { rules }
    }

    /// The stock tiers: finance review and director sign-off for large
    /// expenses and purchases, HR review for long leave.
    #[must_use]
    pub fn default_tiers() -> Self {
        let money = vec![RequestType::Expense, RequestType::Purchase];
        Self::new(vec![
            ApprovalRule {
                id: Uuid::now_v7(),
                name: "Finance review".to_string(),
                min_amount: Some(Decimal::from(1_000)),
                max_amount: None,
                request_types: money.clone(),
                required_role: "finance".to_string(),
                priority: 10,
                timeout_hours: Some(48),
            },
            ApprovalRule {
                id: Uuid::now_v7(),
                name: "Director sign-off".to_string(),
                min_amount: Some(Decimal::from(10_000)),
                max_amount: None,
                request_types: money,
                required_role: "director".to_string(),
                priority: 20,
                timeout_hours: Some(72),
            },
            ApprovalRule {
                id: Uuid::now_v7(),
                name: "Extended leave".to_string(),
                min_amount: Some(Decimal::from(10)),
                max_amount: None,
                request_types: vec![RequestType::Leave],
                required_role: "hr".to_string(),
                priority: 10,
                timeout_hours: Some(48),
            },
        ])
    }

    /// Returns every rule matching the payload, lowest priority first.
    #[must_use]
    pub fn required_tiers(&self, payload: &RequestPayload) -> Vec<&ApprovalRule> {
        let request_type = payload.request_type();
        let value = payload.threshold_value();

        let mut applicable: Vec<_> = self
            .rules
            .iter()
            .filter(|r| r.matches(request_type, value))
            .collect();

        // Stable sort keeps configuration order for equal priorities
        applicable.sort_by_key(|r| r.priority);
        applicable
    }
}

/// Stateless authorization checks.
pub struct ApprovalEngine;

impl ApprovalEngine {
    /// Checks that `actor` is the step's assigned approver or holds its role.
    pub fn authorize_step(step: &ApprovalStep, actor: &Actor) -> Result<(), WorkflowError> {
        if step.is_assigned_to(actor) {
            Ok(())
        } else {
            Err(WorkflowError::denied(
                actor.id,
                format!("act on step {} ({})", step.id, step.assignment_label()),
            ))
        }
    }

    /// Returns true if `actor` holds one of the admin roles.
    #[must_use]
    pub fn is_admin(actor: &Actor, admin_roles: &[String]) -> bool {
        actor.has_any_role(admin_roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use flowgate_shared::types::UserId;

    fn purchase(amount: Decimal) -> RequestPayload {
        RequestPayload::Purchase {
            amount,
            currency: "EUR".to_string(),
            vendor: "Acme".to_string(),
        }
    }

    fn roles(tiers: &[&ApprovalRule]) -> Vec<String> {
        tiers.iter().map(|r| r.required_role.clone()).collect()
    }

    #[test]
    fn test_small_purchase_needs_no_tier() {
        let policy = ApprovalPolicy::default_tiers();
        assert!(policy.required_tiers(&purchase(dec!(999.99))).is_empty());
    }

    #[test]
    fn test_threshold_boundaries_are_inclusive() {
        let policy = ApprovalPolicy::default_tiers();
        assert_eq!(
            roles(&policy.required_tiers(&purchase(dec!(1000)))),
            vec!["finance"]
        );
        assert_eq!(
            roles(&policy.required_tiers(&purchase(dec!(10000)))),
            vec!["finance", "director"]
        );
    }

    #[test]
    fn test_leave_measured_in_days() {
        let policy = ApprovalPolicy::default_tiers();
        let leave = RequestPayload::Leave {
            leave_kind: "annual".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 7, 17).unwrap(),
            days: dec!(13),
        };
        assert_eq!(roles(&policy.required_tiers(&leave)), vec!["hr"]);
    }

    #[test]
    fn test_valueless_request_matches_only_unbounded_rules() {
        let mut policy = ApprovalPolicy::default_tiers();
        policy.rules.push(ApprovalRule {
            id: Uuid::nil(),
            name: "Everything".to_string(),
            min_amount: None,
            max_amount: None,
            request_types: vec![],
            required_role: "manager".to_string(),
            priority: 0,
            timeout_hours: None,
        });
        let general = RequestPayload::General {
            description: "New chair".to_string(),
        };
        assert_eq!(roles(&policy.required_tiers(&general)), vec!["manager"]);
    }

    #[test]
    fn test_authorize_step_by_role() {
        let step = ApprovalStep {
            id: flowgate_shared::types::StepId::new(),
            request_id: flowgate_shared::types::RequestId::new(),
            order: 0,
            approver_role: Some("finance".to_string()),
            approver_id: None,
            approver_name: None,
            status: crate::workflow::types::StepStatus::Pending,
            execution_mode: crate::workflow::types::ExecutionMode::Sequential,
            timeout_hours: None,
            escalate_to: None,
            escalate_to_name: None,
            comments: None,
            action_date: None,
            acted_by: None,
            became_pending_at: None,
            escalated_from: None,
        };
        let finance = Actor::new(UserId::new(), "Fay").with_roles(["FINANCE"]);
        let outsider = Actor::new(UserId::new(), "Oz");

        assert!(ApprovalEngine::authorize_step(&step, &finance).is_ok());
        let err = ApprovalEngine::authorize_step(&step, &outsider).unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
    }

    #[test]
    fn test_is_admin() {
        let admin = Actor::new(UserId::new(), "Ada").with_roles(["Admin"]);
        let user = Actor::new(UserId::new(), "Ulf").with_roles(["manager"]);
        let admin_roles = vec!["admin".to_string()];
        assert!(ApprovalEngine::is_admin(&admin, &admin_roles));
        assert!(!ApprovalEngine::is_admin(&user, &admin_roles));
    }
}
