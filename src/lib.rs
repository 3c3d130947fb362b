//! changeflow - Infrastructure change orchestrator
//!
//! Wraps `terraform apply` in a tracked change: the plan is generated and
//! submitted, a change record is opened, the apply runs with the
//! terminal handed over, and the change record is closed, all while a
//! live display shows progress.
//!
//! # Architecture
//!
//! The system is built around a single-threaded event loop:
//! - Background work (plan, submit, warm-up, change workers) resolves to messages
//! - Only the loop mutates state, one message at a time
//! - Change progress arrives over bounded per-phase channels
//!
//! # Modules
//!
//! - `adapters`: External systems (change service over HTTP, terraform)
//! - `core`: Event loop, workers and the apply state machine
//! - `domain`: Data structures (ChangeId, ChangeProgress, ApplyInvocation)
//! - `ui`: Status rows, progress snapshots and renderers
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Plan, track and apply
//! changeflow apply -- -var-file=prod.tfvars
//!
//! # Apply a saved plan (implies auto-approve)
//! changeflow apply -- ./tfplan
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod testing;
pub mod ui;

// Re-export main types at crate root for convenience
pub use core::{ApplyModel, ApplySettings, Outcome, Program};
pub use domain::{ApplyInvocation, ChangeId, ChangeProgress, PlanArtifact};
