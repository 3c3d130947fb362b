//! Core orchestration logic.
//!
//! This module contains:
//! - Program: the single-threaded event loop and its `Model` trait
//! - Messages: what background work reports back to the loop
//! - Lifecycle: start/end change workers
//! - Tasks: plan, submit and warm-up siblings
//! - Cancel: signal and cancellation watcher
//! - Orchestrator: the apply state machine

pub mod cancel;
pub mod lifecycle;
pub mod messages;
pub mod orchestrator;
pub mod program;
pub mod tasks;

// Re-export commonly used types
pub use messages::{Cmd, Msg, SnapshotEvent, TaskError, TaskId};
pub use orchestrator::{ApplyModel, ApplySettings, Outcome, Phase};
pub use program::{Model, Program};
