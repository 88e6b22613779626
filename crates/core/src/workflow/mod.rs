//! Approval workflow management for Flowgate.
//!
//! This module implements the request lifecycle state machine, the step
//! resolver, the persistence and notification seams, and the engine and
//! escalation scheduler that drive them.
//!
//! # Modules
//!
//! - `types` - Workflow domain types (WorkflowRequest, ApprovalStep, Actor)
//! - `error` - Workflow-specific error types
//! - `approval` - Threshold tiers and authorization checks
//! - `resolver` - Step graph validation and normalization
//! - `service` - Pure state transition logic
//! - `timeline` - Audit trail entries and replay
//! - `store` - Persistence contract and its in-memory implementation (`memory`)
//! - `notify` - Best-effort notification channel
//! - `engine` - Store-backed engine with optimistic concurrency
//! - `escalation` - Periodic sweep over overdue steps

pub mod approval;
pub mod clock;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod memory;
pub mod notify;
pub mod resolver;
pub mod service;
pub mod store;
pub mod timeline;
pub mod types;

#[cfg(test)]
mod approval_props;
#[cfg(test)]
mod service_props;
#[cfg(test)]
mod test_fixtures;

pub use approval::{ApprovalEngine, ApprovalPolicy, ApprovalRule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{AUDIT_TARGET, EngineConfig, WorkflowEngine};
pub use error::WorkflowError;
pub use escalation::{EscalationScheduler, SweepReport};
pub use memory::MemoryRequestStore;
pub use notify::{
    LogNotifier, NoopNotifier, NotificationError, NotificationEvent, NotificationKind, Notifier,
    RecordingNotifier,
};
pub use resolver::{StepResolver, StepSource, StepSpec};
pub use service::{ReturnPolicy, Transition, WorkflowService};
pub use store::{RequestMutation, RequestStore, StoreError};
pub use timeline::{TimelineAction, TimelineEntry, replay};
pub use types::{
    Actor, ApprovalStep, ExecutionMode, NewRequest, RequestPayload, RequestPriority,
    RequestStatus, RequestType, StepAction, StepAssignment, StepStatus, WorkflowRequest,
};
