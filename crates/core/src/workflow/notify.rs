//! Best-effort notifications fired after a transition commits.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowgate_shared::types::{RequestId, UserId};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A step became active for the recipient.
    ApprovalRequested,
    /// Part of a parallel group signed off.
    PartiallyApproved,
    /// Every stage approved.
    RequestApproved,
    /// An approver rejected the request.
    RequestRejected,
    /// The request came back for correction.
    RequestReturned,
    /// The request was withdrawn.
    RequestCancelled,
    /// An overdue step was reassigned to the recipient.
    StepEscalated,
    /// The request was fulfilled.
    RequestCompleted,
}

impl NotificationKind {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::PartiallyApproved => "partially_approved",
            Self::RequestApproved => "request_approved",
            Self::RequestRejected => "request_rejected",
            Self::RequestReturned => "request_returned",
            Self::RequestCancelled => "request_cancelled",
            Self::StepEscalated => "step_escalated",
            Self::RequestCompleted => "request_completed",
        }
    }
}

/// A single outbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Request the event is about.
    pub request_id: RequestId,
    /// Recipient.
    pub to_user_id: UserId,
    /// Event kind.
    pub kind: NotificationKind,
    /// Free-form context for templates.
    pub payload: serde_json::Value,
}

impl NotificationEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        to_user_id: UserId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            request_id,
            to_user_id,
            kind,
            payload,
        }
    }
}

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The transport rejected or failed the delivery.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notification channel.
///
/// Called after commit. Failures are logged by the engine and never affect
/// the transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one event.
    async fn notify(&self, event: NotificationEvent) -> Result<(), NotificationError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: NotificationEvent) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        tracing::info!(
            request_id = %event.request_id,
            to_user_id = %event.to_user_id,
            kind = event.kind.as_str(),
            payload = %event.payload,
            "notification"
        );
        Ok(())
    }
}

/// Collects events in memory; can be switched to fail every delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns a copy of every delivered event.
    #[must_use]
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Returns delivered events of one kind.
    #[must_use]
    pub fn events_of(&self, kind: NotificationKind) -> Vec<NotificationEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery(format!(
                "{} to {} refused",
                event.kind.as_str(),
                event.to_user_id
            )));
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}
