//! Domain types for the changeflow orchestrator.
//!
//! This module contains the core data structures:
//! - Change: the tracked change record and its streamed progress
//! - Plan: plan artifacts and the forwarded apply invocation

pub mod change;
pub mod plan;

// Re-export commonly used types
pub use change::{ChangeId, ChangeProgress};
pub use plan::{ApplyInvocation, InvocationError, PlanArtifact, PlanOrigin};
