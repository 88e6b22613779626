//! Core business logic for Flowgate.
//!
//! This crate contains the approval workflow engine with ZERO web or
//! database dependencies. Domain types, validation rules, the state machine
//! and the store/notifier seams live here; `flowgate-db` and `flowgate-api`
//! plug into those seams.
//!
//! # Modules
//!
//! - `workflow` - Request lifecycle, approval chains, escalation

pub mod workflow;
