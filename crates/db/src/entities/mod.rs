//! `SeaORM` entities for the workflow tables.

pub mod approval_steps;
pub mod timeline_entries;
pub mod workflow_requests;
