//! Adapter interfaces for external systems.
//!
//! The orchestrator only sees these traits: the change service that
//! tracks changes remotely, and the plan tool that produces and reads
//! plan files.

pub mod http;
pub mod terraform;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::{ChangeId, ChangeProgress};

// Re-export the concrete adapters
pub use http::{HttpChangeService, ServiceError};
pub use terraform::TerraformAdapter;

/// Server-streamed progress of a start/end change call
pub type ProgressStream = BoxStream<'static, Result<ChangeProgress>>;

/// Remote service tracking change records
#[async_trait]
pub trait ChangeService: Send + Sync {
    /// Human-readable service name
    fn name(&self) -> &str;

    /// Find or create the change for a correlation value
    async fn identify_change(&self, ticket_link: &str) -> Result<ChangeId>;

    /// Take the "before" snapshot of a change
    async fn start_change(&self, change: ChangeId) -> Result<ProgressStream>;

    /// Take the "after" snapshot of a change
    async fn end_change(&self, change: ChangeId) -> Result<ProgressStream>;

    /// Upload a generated plan for the change identified by `ticket_link`
    async fn submit_plan(&self, ticket_link: &str, plan_file: &Path) -> Result<()>;

    /// Ask the service to warm its indexes before the change starts
    async fn warmup(&self) -> Result<()>;
}

/// External tool that generates and reads plan files
#[async_trait]
pub trait PlanTool: Send + Sync {
    fn name(&self) -> &str;

    /// Run plan generation with the given arguments (including `-out`)
    async fn generate(&self, plan_args: &[String]) -> Result<()>;

    /// Extract the correlation value of a plan file
    async fn ticket_link(&self, plan_file: &Path) -> Result<String>;
}
