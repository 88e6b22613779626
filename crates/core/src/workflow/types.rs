//! Workflow domain types for the approval engine.
//!
//! This module defines the request, step and actor types that the state
//! machine operates on, plus the closed enums used on every inbound call.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use flowgate_shared::types::{RequestId, StepId, TenantId, UserId};

use crate::workflow::error::WorkflowError;

/// Generates `as_str`, `parse`, `Display` and `FromStr` for a closed enum.
///
/// `FromStr` rejects unknown values with `WorkflowError::Validation` so that
/// inbound strings never reach the state machine unchecked.
macro_rules! closed_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Returns the string representation.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Parses a value, ignoring case and surrounding whitespace.
            pub fn parse(s: &str) -> Option<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = WorkflowError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s).ok_or_else(|| {
                    WorkflowError::Validation(format!("unknown {} `{}`", $label, s))
                })
            }
        }
    };
}

/// Request status in the approval workflow.
///
/// Allowed edges are enforced by `WorkflowService::is_valid_transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Saved but not yet submitted.
    Draft,
    /// Submitted; no stage has been approved yet.
    Pending,
    /// At least one stage approved, later stages outstanding.
    InReview,
    /// Some but not all siblings of the active parallel group approved.
    PartiallyApproved,
    /// Every stage approved.
    Approved,
    /// An approver rejected the request.
    Rejected,
    /// Sent back to the requester for correction.
    Returned,
    /// Withdrawn by the requester or an admin.
    Cancelled,
    /// Approved and fulfilled.
    Completed,
    /// An active step timed out and was reassigned.
    Escalated,
}

closed_enum!(RequestStatus, "request status", {
    Draft => "draft",
    Pending => "pending",
    InReview => "in_review",
    PartiallyApproved => "partially_approved",
    Approved => "approved",
    Rejected => "rejected",
    Returned => "returned",
    Cancelled => "cancelled",
    Completed => "completed",
    Escalated => "escalated",
});

impl RequestStatus {
    /// Statuses in which approvers can act on the active stage.
    pub const ACTIVE: &'static [Self] = &[
        Self::Pending,
        Self::InReview,
        Self::PartiallyApproved,
        Self::Escalated,
    ];

    /// Returns true if no further transition exists.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed)
    }

    /// Returns true if step actions are no longer accepted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.is_terminal() || *self == Self::Approved
    }

    /// Returns true if approvers can act on the request.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Returns true if the requester or an admin may still cancel.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Draft | Self::Pending | Self::InReview | Self::PartiallyApproved
        )
    }
}

/// Status of a single approval step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Queued in a later stage.
    Waiting,
    /// Active and awaiting its approver.
    Pending,
    /// Active and reassigned to a fallback approver.
    Escalated,
    /// Signed off.
    Approved,
    /// Rejected by its approver.
    Rejected,
    /// Closed without a decision.
    Skipped,
}

closed_enum!(StepStatus, "step status", {
    Waiting => "waiting",
    Pending => "pending",
    Escalated => "escalated",
    Approved => "approved",
    Rejected => "rejected",
    Skipped => "skipped",
});

impl StepStatus {
    /// Returns true if the step is awaiting a decision right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }

    /// Returns true if the step has not been resolved yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Waiting | Self::Pending | Self::Escalated)
    }
}

/// How the steps of a stage relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One step per stage.
    #[default]
    Sequential,
    /// Every sibling sharing the order value must approve.
    Parallel,
}

closed_enum!(ExecutionMode, "execution mode", {
    Sequential => "sequential",
    Parallel => "parallel",
});

/// Decision an approver can take on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Sign off the step.
    Approve,
    /// Reject the whole request.
    Reject,
    /// Send the request back to the requester.
    Return,
}

closed_enum!(StepAction, "step action", {
    Approve => "approve",
    Reject => "reject",
    Return => "return",
});

/// Request priority, used for ordering inbox views.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    /// Low priority.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// High priority.
    High,
    /// Needs attention today.
    Urgent,
}

closed_enum!(RequestPriority, "priority", {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

/// Kind of business request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Paid or unpaid leave.
    Leave,
    /// Expense reimbursement.
    Expense,
    /// Purchase order.
    Purchase,
    /// Overtime claim.
    Overtime,
    /// Certification renewal.
    CertificationRenewal,
    /// Free-form request.
    General,
}

closed_enum!(RequestType, "request type", {
    Leave => "leave",
    Expense => "expense",
    Purchase => "purchase",
    Overtime => "overtime",
    CertificationRenewal => "certification_renewal",
    General => "general",
});

/// Type-specific request payload, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Leave request.
    Leave {
        /// Leave category (annual, sick, ...).
        leave_kind: String,
        /// First day of leave.
        start_date: NaiveDate,
        /// Last day of leave (inclusive).
        end_date: NaiveDate,
        /// Working days requested.
        days: Decimal,
    },
    /// Expense reimbursement.
    Expense {
        /// Claimed amount.
        amount: Decimal,
        /// ISO 4217 currency code.
        currency: String,
        /// Expense category.
        category: String,
    },
    /// Purchase order.
    Purchase {
        /// Order total.
        amount: Decimal,
        /// ISO 4217 currency code.
        currency: String,
        /// Supplier name.
        vendor: String,
    },
    /// Overtime claim.
    Overtime {
        /// Day the overtime was worked.
        work_date: NaiveDate,
        /// Hours claimed.
        hours: Decimal,
    },
    /// Certification renewal.
    CertificationRenewal {
        /// Certification name.
        certification: String,
        /// Current expiry date.
        expires_on: NaiveDate,
        /// Renewal fee, if any.
        fee: Option<Decimal>,
    },
    /// Free-form request.
    General {
        /// What is being asked for.
        description: String,
    },
}

impl RequestPayload {
    /// Returns the request type this payload belongs to.
    #[must_use]
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Leave { .. } => RequestType::Leave,
            Self::Expense { .. } => RequestType::Expense,
            Self::Purchase { .. } => RequestType::Purchase,
            Self::Overtime { .. } => RequestType::Overtime,
            Self::CertificationRenewal { .. } => RequestType::CertificationRenewal,
            Self::General { .. } => RequestType::General,
        }
    }

    /// Returns the monetary amount used for threshold tiers, if any.
    #[must_use]
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            Self::Expense { amount, .. } | Self::Purchase { amount, .. } => Some(*amount),
            Self::CertificationRenewal { fee, .. } => *fee,
            Self::Leave { .. } | Self::Overtime { .. } | Self::General { .. } => None,
        }
    }

    /// Returns the quantity approval tiers are measured against.
    ///
    /// Money for expense, purchase and renewal fees; days for leave; hours
    /// for overtime.
    #[must_use]
    pub fn threshold_value(&self) -> Option<Decimal> {
        match self {
            Self::Leave { days, .. } => Some(*days),
            Self::Overtime { hours, .. } => Some(*hours),
            _ => self.amount(),
        }
    }

    /// Validates the payload for its own variant.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        match self {
            Self::Leave {
                leave_kind,
                start_date,
                end_date,
                days,
            } => {
                require_text("leave_kind", leave_kind)?;
                if end_date < start_date {
                    return Err(WorkflowError::Validation(
                        "leave end_date is before start_date".to_string(),
                    ));
                }
                require_positive("days", *days)
            }
            Self::Expense {
                amount,
                currency,
                category,
            } => {
                require_positive("amount", *amount)?;
                require_currency(currency)?;
                require_text("category", category)
            }
            Self::Purchase {
                amount,
                currency,
                vendor,
            } => {
                require_positive("amount", *amount)?;
                require_currency(currency)?;
                require_text("vendor", vendor)
            }
            Self::Overtime { hours, .. } => {
                require_positive("hours", *hours)?;
                if *hours > Decimal::from(24) {
                    return Err(WorkflowError::Validation(
                        "overtime hours cannot exceed 24 per day".to_string(),
                    ));
                }
                Ok(())
            }
            Self::CertificationRenewal {
                certification, fee, ..
            } => {
                require_text("certification", certification)?;
                match fee {
                    Some(fee) if fee.is_sign_negative() => Err(WorkflowError::Validation(
                        "fee cannot be negative".to_string(),
                    )),
                    _ => Ok(()),
                }
            }
            Self::General { description } => require_text("description", description),
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        return Err(WorkflowError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_positive(field: &str, value: Decimal) -> Result<(), WorkflowError> {
    if value <= Decimal::ZERO {
        return Err(WorkflowError::Validation(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(())
}

fn require_currency(code: &str) -> Result<(), WorkflowError> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(WorkflowError::Validation(format!(
            "currency `{code}` is not an ISO 4217 code"
        )));
    }
    Ok(())
}

/// A resolved identity acting on a request.
///
/// Authentication happens upstream; the engine trusts the id and roles it is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User ID.
    pub id: UserId,
    /// Display name recorded in the timeline.
    pub name: String,
    /// Roles held by the user.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    /// Creates an actor without roles.
    #[must_use]
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            roles: Vec::new(),
        }
    }

    /// Adds roles to the actor.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Returns true if the actor holds `role` (case-insensitive).
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        let role = role.trim();
        self.roles.iter().any(|r| r.trim().eq_ignore_ascii_case(role))
    }

    /// Returns true if the actor holds any of `roles`.
    #[must_use]
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// One sign-off unit within a request's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// Step ID.
    pub id: StepId,
    /// Owning request.
    pub request_id: RequestId,
    /// Stage number; siblings of a parallel group share it.
    pub order: u32,
    /// Role allowed to act, if assigned by role.
    pub approver_role: Option<String>,
    /// User allowed to act, if assigned by person.
    pub approver_id: Option<UserId>,
    /// Display name of the assigned approver.
    pub approver_name: Option<String>,
    /// Current status.
    pub status: StepStatus,
    /// Sequential or parallel.
    pub execution_mode: ExecutionMode,
    /// Hours the step may stay pending before escalation.
    pub timeout_hours: Option<u32>,
    /// Explicit fallback approver on escalation.
    pub escalate_to: Option<UserId>,
    /// Display name of the fallback approver.
    pub escalate_to_name: Option<String>,
    /// Comment left with the last decision.
    pub comments: Option<String>,
    /// When the last decision was taken.
    pub action_date: Option<DateTime<Utc>>,
    /// Who took the last decision.
    pub acted_by: Option<UserId>,
    /// When the step last became active.
    pub became_pending_at: Option<DateTime<Utc>>,
    /// Assignment the step had before it was escalated.
    #[serde(default)]
    pub escalated_from: Option<StepAssignment>,
}

/// Who a step is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAssignment {
    /// Role allowed to act.
    pub approver_role: Option<String>,
    /// User allowed to act.
    pub approver_id: Option<UserId>,
    /// Display name of the approver.
    pub approver_name: Option<String>,
}

impl ApprovalStep {
    /// Returns true if `actor` may act on this step.
    #[must_use]
    pub fn is_assigned_to(&self, actor: &Actor) -> bool {
        self.approver_id == Some(actor.id)
            || self
                .approver_role
                .as_deref()
                .is_some_and(|role| actor.has_role(role))
    }

    /// Returns true if the step has been pending for longer than its timeout.
    ///
    /// The comparison is strict so a sweep never fires early.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if self.status != StepStatus::Pending {
            return false;
        }
        match (self.timeout_hours, self.became_pending_at) {
            (Some(hours), Some(since)) => now - since > Duration::hours(i64::from(hours)),
            _ => false,
        }
    }

    /// Moves a waiting step into the active stage.
    pub(crate) fn activate(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Pending;
        self.became_pending_at = Some(now);
    }

    /// Swaps in `to`, remembering the first assignment for [`Self::reset`].
    pub(crate) fn reassign(&mut self, to: StepAssignment) {
        let previous = StepAssignment {
            approver_role: self.approver_role.take(),
            approver_id: self.approver_id.take(),
            approver_name: self.approver_name.take(),
        };
        self.escalated_from.get_or_insert(previous);
        self.approver_role = to.approver_role;
        self.approver_id = to.approver_id;
        self.approver_name = to.approver_name;
    }

    /// Puts the step back in the queue, clearing any decision and
    /// undoing an escalation.
    pub(crate) fn reset(&mut self) {
        if let Some(original) = self.escalated_from.take() {
            self.approver_role = original.approver_role;
            self.approver_id = original.approver_id;
            self.approver_name = original.approver_name;
        }
        self.status = StepStatus::Waiting;
        self.comments = None;
        self.action_date = None;
        self.acted_by = None;
        self.became_pending_at = None;
    }

    /// Human-readable description of the current assignment.
    #[must_use]
    pub fn assignment_label(&self) -> String {
        match (&self.approver_name, self.approver_id, &self.approver_role) {
            (Some(name), Some(id), _) => format!("{name} ({id})"),
            (None, Some(id), _) => format!("user {id}"),
            (Some(name), None, Some(role)) => format!("{name} (role {role})"),
            (None, None, Some(role)) => format!("role {role}"),
            (_, None, None) => "unassigned".to_string(),
        }
    }
}

/// A business request moving through its approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// Request ID.
    pub id: RequestId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// User who raised the request.
    pub requester_id: UserId,
    /// Display name of the requester.
    pub requester_name: String,
    /// Short title.
    pub title: String,
    /// Type-specific payload.
    pub payload: RequestPayload,
    /// Current status.
    pub status: RequestStatus,
    /// Order value of the active stage.
    pub current_step: u32,
    /// Priority.
    pub priority: RequestPriority,
    /// Date the requester needs a decision by.
    pub due_date: Option<NaiveDate>,
    /// Optimistic concurrency version, bumped on every committed transition.
    pub version: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last transition timestamp.
    pub updated_at: DateTime<Utc>,
    /// Materialized approval chain, ordered by stage.
    pub steps: Vec<ApprovalStep>,
}

impl WorkflowRequest {
    /// Returns the request type.
    #[must_use]
    pub fn request_type(&self) -> RequestType {
        self.payload.request_type()
    }

    /// Finds a step by ID.
    #[must_use]
    pub fn step(&self, step_id: StepId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Steps belonging to the stage with the given order value.
    pub fn stage(&self, order: u32) -> impl Iterator<Item = &ApprovalStep> {
        self.steps.iter().filter(move |s| s.order == order)
    }

    /// Distinct stage orders, ascending.
    #[must_use]
    pub fn stage_orders(&self) -> Vec<u32> {
        let mut orders: Vec<u32> = self.steps.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        orders.dedup();
        orders
    }

    /// The first stage order greater than `order`.
    #[must_use]
    pub fn next_stage_after(&self, order: u32) -> Option<u32> {
        self.steps
            .iter()
            .map(|s| s.order)
            .filter(|o| *o > order)
            .min()
    }

    /// Steps in the active stage that are awaiting a decision.
    pub fn active_steps(&self) -> impl Iterator<Item = &ApprovalStep> {
        self.steps
            .iter()
            .filter(|s| s.order == self.current_step && s.status.is_active())
    }

    /// Returns true if `actor` can act on some active step right now.
    #[must_use]
    pub fn awaits(&self, actor: &Actor) -> bool {
        self.status.is_actionable() && self.active_steps().any(|s| s.is_assigned_to(actor))
    }

    /// Returns true if `actor` is the requester or is named on any step.
    #[must_use]
    pub fn involves(&self, actor: &Actor) -> bool {
        self.requester_id == actor.id || self.steps.iter().any(|s| s.is_assigned_to(actor))
    }

    pub(crate) fn step_index(&self, step_id: StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub(crate) fn activate_stage(&mut self, order: u32, now: DateTime<Utc>) {
        for step in self.steps.iter_mut().filter(|s| s.order == order) {
            if step.status == StepStatus::Waiting {
                step.activate(now);
            }
        }
    }
}

/// Input for raising a new request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Requester identity.
    pub requester: Actor,
    /// Short title.
    pub title: String,
    /// Type-specific payload.
    pub payload: RequestPayload,
    /// Priority.
    pub priority: RequestPriority,
    /// Date the requester needs a decision by.
    pub due_date: Option<NaiveDate>,
}
