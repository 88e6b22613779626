//! Append-only audit trail of request transitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowgate_shared::types::{RequestId, StepId, TimelineEntryId, UserId};

use crate::workflow::error::WorkflowError;
use crate::workflow::service::WorkflowService;
use crate::workflow::types::RequestStatus;

/// What happened in a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineAction {
    /// Request raised and submitted in one call.
    Created,
    /// Request saved as a draft.
    Drafted,
    /// Draft submitted for approval.
    Submitted,
    /// A step was approved.
    Approved,
    /// A step was rejected.
    Rejected,
    /// Request returned to the requester.
    Returned,
    /// Returned request submitted again.
    Resubmitted,
    /// Request cancelled.
    Cancelled,
    /// Overdue step reassigned.
    Escalated,
    /// Approved request fulfilled.
    Completed,
    /// Free-form comment; status unchanged.
    Commented,
}

impl TimelineAction {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Drafted => "drafted",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
            Self::Resubmitted => "resubmitted",
            Self::Cancelled => "cancelled",
            Self::Escalated => "escalated",
            Self::Completed => "completed",
            Self::Commented => "commented",
        }
    }
}

impl fmt::Display for TimelineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimelineAction {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "drafted" => Ok(Self::Drafted),
            "submitted" => Ok(Self::Submitted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "returned" => Ok(Self::Returned),
            "resubmitted" => Ok(Self::Resubmitted),
            "cancelled" => Ok(Self::Cancelled),
            "escalated" => Ok(Self::Escalated),
            "completed" => Ok(Self::Completed),
            "commented" => Ok(Self::Commented),
            other => Err(WorkflowError::Validation(format!(
                "unknown timeline action `{other}`"
            ))),
        }
    }
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Entry ID.
    pub id: TimelineEntryId,
    /// Owning request.
    pub request_id: RequestId,
    /// Store-assigned insertion sequence; breaks timestamp ties.
    pub sequence: i64,
    /// What happened.
    pub action: TimelineAction,
    /// Who did it; `None` for the escalation sweep.
    pub actor_id: Option<UserId>,
    /// Display name of the actor.
    pub actor_name: String,
    /// Step acted on, if any.
    pub step_id: Option<StepId>,
    /// Status before; `None` for the first entry.
    pub from_status: Option<RequestStatus>,
    /// Status after.
    pub to_status: RequestStatus,
    /// Comment or structured note.
    pub details: Option<String>,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

/// Actor name recorded for system-driven transitions.
pub const SYSTEM_ACTOR: &str = "system";

impl TimelineEntry {
    /// Creates an unsequenced entry; the store assigns `sequence` on append.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        action: TimelineAction,
        from_status: Option<RequestStatus>,
        to_status: RequestStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TimelineEntryId::new(),
            request_id,
            sequence: 0,
            action,
            actor_id: None,
            actor_name: SYSTEM_ACTOR.to_string(),
            step_id: None,
            from_status,
            to_status,
            details: None,
            created_at,
        }
    }

    /// Sets the acting user.
    #[must_use]
    pub fn by(mut self, actor_id: UserId, actor_name: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_name = actor_name.into();
        self
    }

    /// Sets the step acted on.
    #[must_use]
    pub fn on_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    /// Sets the details text.
    #[must_use]
    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    /// Returns true if the entry changed the request status.
    #[must_use]
    pub fn is_transition(&self) -> bool {
        self.from_status != Some(self.to_status)
    }
}

/// Orders entries chronologically, sequence breaking ties.
pub fn sort_chronologically(entries: &mut [TimelineEntry]) {
    entries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.sequence.cmp(&b.sequence))
    });
}

/// Replays a timeline and returns the status it ends in.
///
/// Each entry must start where the previous one ended and follow an allowed
/// edge; comment entries keep the status unchanged.
pub fn replay(entries: &[TimelineEntry]) -> Result<RequestStatus, WorkflowError> {
    let mut ordered = entries.to_vec();
    sort_chronologically(&mut ordered);

    let mut current: Option<RequestStatus> = None;
    for entry in &ordered {
        if entry.from_status != current {
            return Err(WorkflowError::Validation(format!(
                "timeline entry {} starts from {:?} but the request was {:?}",
                entry.id, entry.from_status, current
            )));
        }
        if let Some(from) = current
            && entry.is_transition()
            && !WorkflowService::is_valid_transition(from, entry.to_status)
        {
            return Err(WorkflowError::Validation(format!(
                "timeline entry {} moves {} -> {}, which is not allowed",
                entry.id, from, entry.to_status
            )));
        }
        current = Some(entry.to_status);
    }

    current.ok_or_else(|| WorkflowError::Validation("timeline is empty".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(
        action: TimelineAction,
        from: Option<RequestStatus>,
        to: RequestStatus,
        at: DateTime<Utc>,
        sequence: i64,
    ) -> TimelineEntry {
        let mut e = TimelineEntry::new(RequestId::new(), action, from, to, at);
        e.sequence = sequence;
        e
    }

    #[test]
    fn test_replay_follows_chain() {
        let t0 = Utc::now();
        let entries = vec![
            entry(TimelineAction::Created, None, RequestStatus::Pending, t0, 1),
            entry(
                TimelineAction::Approved,
                Some(RequestStatus::Pending),
                RequestStatus::InReview,
                t0 + Duration::minutes(5),
                2,
            ),
            entry(
                TimelineAction::Commented,
                Some(RequestStatus::InReview),
                RequestStatus::InReview,
                t0 + Duration::minutes(6),
                3,
            ),
            entry(
                TimelineAction::Approved,
                Some(RequestStatus::InReview),
                RequestStatus::Approved,
                t0 + Duration::minutes(7),
                4,
            ),
        ];
        assert_eq!(replay(&entries).unwrap(), RequestStatus::Approved);
    }

    #[test]
    fn test_replay_breaks_timestamp_ties_by_sequence() {
        let t0 = Utc::now();
        // Same timestamp, supplied out of order.
        let entries = vec![
            entry(
                TimelineAction::Rejected,
                Some(RequestStatus::Pending),
                RequestStatus::Rejected,
                t0,
                2,
            ),
            entry(TimelineAction::Created, None, RequestStatus::Pending, t0, 1),
        ];
        assert_eq!(replay(&entries).unwrap(), RequestStatus::Rejected);
    }

    #[test]
    fn test_replay_rejects_broken_chain() {
        let t0 = Utc::now();
        let entries = vec![
            entry(TimelineAction::Created, None, RequestStatus::Pending, t0, 1),
            entry(
                TimelineAction::Completed,
                Some(RequestStatus::Approved),
                RequestStatus::Completed,
                t0 + Duration::minutes(1),
                2,
            ),
        ];
        assert!(replay(&entries).is_err());
    }

    #[test]
    fn test_replay_rejects_disallowed_edge() {
        let t0 = Utc::now();
        let entries = vec![
            entry(TimelineAction::Created, None, RequestStatus::Pending, t0, 1),
            entry(
                TimelineAction::Completed,
                Some(RequestStatus::Pending),
                RequestStatus::Completed,
                t0 + Duration::minutes(1),
                2,
            ),
        ];
        assert!(replay(&entries).is_err());
    }

    #[test]
    fn test_replay_of_empty_timeline_fails() {
        assert!(replay(&[]).is_err());
    }

    #[test]
    fn test_action_parse_round_trip() {
        for action in [
            TimelineAction::Created,
            TimelineAction::Escalated,
            TimelineAction::Commented,
        ] {
            assert_eq!(action.as_str().parse::<TimelineAction>().unwrap(), action);
        }
        assert!("voided".parse::<TimelineAction>().is_err());
    }
}
