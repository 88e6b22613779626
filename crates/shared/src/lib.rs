//! Shared identifiers, errors, and configuration for Flowgate.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for requests, steps, timeline entries, users and tenants
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, EscalationConfig, WorkflowConfig};
pub use error::{AppError, AppResult};
