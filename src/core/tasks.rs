//! Sibling tasks that run alongside the change lifecycle: plan
//! generation, plan submission and service warm-up.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use super::lifecycle::{resolve_ticket_link, WorkerContext};
use super::messages::{Cmd, Msg, TaskId};
use crate::adapters::{ChangeService, PlanTool};

/// Generate the plan; without it there is nothing to apply
pub fn generate_plan(plan_tool: Arc<dyn PlanTool>, plan_args: Vec<String>, id: TaskId) -> Cmd {
    Cmd::task(async move {
        info!(tool = plan_tool.name(), args = %plan_args.join(" "), "Generating plan");
        match plan_tool.generate(&plan_args).await {
            Ok(()) => Some(Msg::PlanFinished),
            Err(e) => Some(Msg::fatal(Some(id), e.context("failed to generate plan"))),
        }
    })
}

/// Upload the generated plan; failures only mark the submit row
pub fn submit_plan(ctx: WorkerContext, id: TaskId) -> Cmd {
    Cmd::task(async move {
        let result = async {
            let ticket_link = resolve_ticket_link(&ctx).await?;
            ctx.service
                .submit_plan(&ticket_link, &ctx.plan_file)
                .await
                .context("failed to submit plan")
        }
        .await;

        match result {
            Ok(()) => Some(Msg::SubmitFinished),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Plan submission failed");
                Some(Msg::non_fatal(Some(id), e))
            }
        }
    })
}

/// Ask the service to warm up; a failure still lets the run continue
pub fn warmup(service: Arc<dyn ChangeService>, id: TaskId) -> Cmd {
    Cmd::task(async move {
        match service.warmup().await {
            Ok(()) => Some(Msg::WarmupFinished),
            Err(e) => Some(Msg::non_fatal(Some(id), e.context("failed to warm up"))),
        }
    })
}
