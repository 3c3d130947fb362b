//! Change lifecycle workers.
//!
//! The start and end workers each drive one server-streaming exchange
//! with the change service and relay what they see onto a bounded
//! channel dedicated to their phase. Every emission, including the
//! terminal `Finish` or fatal error, goes through that channel so the
//! loop observes them in order.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::messages::{Msg, SnapshotEvent, TaskId};
use crate::adapters::{ChangeService, PlanTool, ProgressStream};
use crate::domain::{ChangeId, ChangeProgress};

/// Capacity of each phase's progress channel
pub const PROGRESS_CAPACITY: usize = 10;

/// What a worker needs from the run, cloned out of the loop state
#[derive(Clone)]
pub struct WorkerContext {
    pub service: Arc<dyn ChangeService>,
    pub plan_tool: Arc<dyn PlanTool>,
    /// Configured correlation value, if any
    pub ticket_link: Option<String>,
    pub plan_file: PathBuf,
    pub token: CancellationToken,
}

/// Configured ticket link, or the one derived from the plan file
pub async fn resolve_ticket_link(ctx: &WorkerContext) -> Result<String> {
    if let Some(link) = ctx.ticket_link.as_deref().filter(|l| !l.is_empty()) {
        return Ok(link.to_string());
    }

    ctx.plan_tool
        .ticket_link(&ctx.plan_file)
        .await
        .context("failed to determine ticket link from plan")
}

/// Identify the change, then stream the start snapshot
pub async fn start_change(ctx: WorkerContext, snapshot: TaskId, tx: mpsc::Sender<Msg>) {
    let token = ctx.token.clone();
    tokio::select! {
        _ = token.cancelled() => debug!("Start change cancelled"),
        terminal = run_start(&ctx, snapshot, &tx) => {
            if let Some(msg) = terminal {
                let _ = tx.send(msg).await;
            }
        }
    }
}

/// Stream the end snapshot of an already identified change
pub async fn end_change(
    ctx: WorkerContext,
    change: ChangeId,
    snapshot: TaskId,
    tx: mpsc::Sender<Msg>,
) {
    let token = ctx.token.clone();
    tokio::select! {
        _ = token.cancelled() => debug!("End change cancelled"),
        terminal = run_end(&ctx, change, snapshot, &tx) => {
            if let Some(msg) = terminal {
                let _ = tx.send(msg).await;
            }
        }
    }
}

/// Returns the terminal message, or `None` once the loop stopped listening
async fn run_start(ctx: &WorkerContext, id: TaskId, tx: &mpsc::Sender<Msg>) -> Option<Msg> {
    let ticket_link = match resolve_ticket_link(ctx).await {
        Ok(link) => link,
        Err(e) => return Some(Msg::fatal(Some(id), e)),
    };

    let change = match ctx.service.identify_change(&ticket_link).await {
        Ok(change) => change,
        Err(e) => return Some(Msg::fatal(Some(id), e.context("failed to identify change"))),
    };
    info!(%change, %ticket_link, "Change identified");

    tx.send(Msg::ChangeIdentified(change)).await.ok()?;
    tx.send(start_event(id, "starting")).await.ok()?;

    let stream = match ctx.service.start_change(change).await {
        Ok(stream) => stream,
        Err(e) => return Some(Msg::fatal(Some(id), e.context("failed to start change"))),
    };

    relay(stream, id, "starting", tx, "failed to process start change").await
}

async fn run_end(
    ctx: &WorkerContext,
    change: ChangeId,
    id: TaskId,
    tx: &mpsc::Sender<Msg>,
) -> Option<Msg> {
    tx.send(start_event(id, "ending")).await.ok()?;

    let stream = match ctx.service.end_change(change).await {
        Ok(stream) => stream,
        Err(e) => return Some(Msg::fatal(Some(id), e.context("failed to end change"))),
    };

    relay(stream, id, "ending", tx, "failed to process end change").await
}

fn start_event(id: TaskId, phase: &str) -> Msg {
    Msg::snapshot(
        id,
        SnapshotEvent::Start {
            phase: phase.to_string(),
        },
    )
}

/// Forward every stream message as progress; finish with the last one
async fn relay(
    mut stream: ProgressStream,
    id: TaskId,
    phase: &str,
    tx: &mpsc::Sender<Msg>,
    failure: &'static str,
) -> Option<Msg> {
    let mut last = ChangeProgress::new(phase, 0, 0);

    while let Some(next) = stream.next().await {
        let progress = match next {
            Ok(progress) => progress,
            Err(e) => return Some(Msg::fatal(Some(id), e.context(failure))),
        };

        trace!(
            state = %progress.state,
            items = progress.num_items,
            edges = progress.num_edges,
            "progress"
        );

        let event = SnapshotEvent::Progress {
            phase: progress.state.clone(),
            items: progress.num_items,
            edges: progress.num_edges,
        };
        tx.send(Msg::snapshot(id, event)).await.ok()?;
        last = progress;
    }

    Some(Msg::snapshot(
        id,
        SnapshotEvent::Finish {
            phase: last.state,
            items: last.num_items,
            edges: last.num_edges,
        },
    ))
}
