//! Apply orchestrator.
//!
//! Sequences plan, submit and warm-up, then start-change, the apply
//! subprocess and end-change. Every transition happens inside
//! [`Model::update`]; background work only ever reports back through
//! messages.

use std::sync::Arc;

use anyhow::anyhow;
use crossterm::event::KeyCode;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cancel::wait_for_cancellation;
use super::lifecycle::{self, WorkerContext, PROGRESS_CAPACITY};
use super::messages::{Cmd, Msg, TaskError, TaskId};
use super::program::Model;
use super::tasks;
use crate::adapters::{ChangeService, PlanTool};
use crate::domain::{ApplyInvocation, ChangeId, PlanArtifact};
use crate::ui::{SnapshotModel, TaskModel, TaskStatus};

/// Run settings that do not come from the forwarded arguments
#[derive(Debug, Clone)]
pub struct ApplySettings {
    /// Correlation value; derived from the plan when unset
    pub ticket_link: Option<String>,

    /// Exported as `AWS_PROFILE` to the apply subprocess
    pub aws_profile: Option<String>,

    pub apply_binary: String,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            ticket_link: None,
            aws_profile: None,
            apply_binary: "terraform".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Plan, submit and warm-up in flight
    Preparing,
    Starting,
    AwaitingApproval,
    Applying,
    Ending,
    Done,
    Failed,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    /// Quit key, declined approval or a shutdown signal
    Aborted,
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Completed => 0,
            Outcome::Failed(_) | Outcome::Aborted => 1,
        }
    }
}

/// Bounded progress channel of one lifecycle phase.
///
/// The worker owns the sender; the loop drains the receiver one message
/// at a time through [`PhaseChannel::wait`].
struct PhaseChannel {
    tx: Option<mpsc::Sender<Msg>>,
    rx: Arc<Mutex<mpsc::Receiver<Msg>>>,
}

impl PhaseChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(PROGRESS_CAPACITY);
        Self {
            tx: Some(tx),
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Hand the sender to the worker; dropping it closes the channel
    fn take_sender(&mut self) -> Option<mpsc::Sender<Msg>> {
        self.tx.take()
    }

    /// Receive the next message; resolves to nothing once closed
    fn wait(&self) -> Cmd {
        let rx = self.rx.clone();
        Cmd::task(async move { rx.lock().await.recv().await })
    }
}

pub struct ApplyModel {
    invocation: ApplyInvocation,
    settings: ApplySettings,
    service: Arc<dyn ChangeService>,
    plan_tool: Arc<dyn PlanTool>,
    token: CancellationToken,

    phase: Phase,
    header: String,

    plan_task: TaskModel,
    submit_task: TaskModel,
    warmup_task: TaskModel,
    starting: SnapshotModel,
    ending: SnapshotModel,
    starting_channel: PhaseChannel,
    ending_channel: PhaseChannel,

    plan_finished: bool,
    warmup_finished: bool,
    barrier_fired: bool,
    apply_launched: bool,

    change: Option<ChangeId>,
    failure: Option<TaskError>,
}

impl ApplyModel {
    pub fn new(
        invocation: ApplyInvocation,
        settings: ApplySettings,
        service: Arc<dyn ChangeService>,
        plan_tool: Arc<dyn PlanTool>,
        token: CancellationToken,
    ) -> Self {
        let header = invocation.header();
        // a saved plan already satisfies the plan side of the barrier
        let plan_finished = !invocation.needs_plan();

        Self {
            invocation,
            settings,
            service,
            plan_tool,
            token,
            phase: Phase::Idle,
            header,
            plan_task: TaskModel::new("Planning Changes"),
            submit_task: TaskModel::new("Uploading Planned Changes"),
            warmup_task: TaskModel::new("Preparing Change Analysis"),
            starting: SnapshotModel::new("Starting Change"),
            ending: SnapshotModel::new("Ending Change"),
            starting_channel: PhaseChannel::new(),
            ending_channel: PhaseChannel::new(),
            plan_finished,
            warmup_finished: false,
            barrier_fired: false,
            apply_launched: false,
            change: None,
            failure: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn change(&self) -> Option<ChangeId> {
        self.change
    }

    pub fn barrier_fired(&self) -> bool {
        self.barrier_fired
    }

    pub fn plan_task(&self) -> &TaskModel {
        &self.plan_task
    }

    pub fn submit_task(&self) -> &TaskModel {
        &self.submit_task
    }

    pub fn warmup_task(&self) -> &TaskModel {
        &self.warmup_task
    }

    pub fn starting(&self) -> &SnapshotModel {
        &self.starting
    }

    pub fn ending(&self) -> &SnapshotModel {
        &self.ending
    }

    pub fn outcome(&self) -> Outcome {
        match (self.phase, &self.failure) {
            (Phase::Done, _) => Outcome::Completed,
            (Phase::Failed, Some(err)) => Outcome::Failed(err.to_string()),
            (Phase::Failed, None) => Outcome::Failed("unknown failure".to_string()),
            _ => Outcome::Aborted,
        }
    }

    /// Release the plan artifact, e.g. to keep a generated plan
    pub fn into_plan(self) -> PlanArtifact {
        self.invocation.plan
    }

    fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Failed)
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            service: self.service.clone(),
            plan_tool: self.plan_tool.clone(),
            ticket_link: self.settings.ticket_link.clone(),
            plan_file: self.invocation.plan.path().to_path_buf(),
            token: self.token.clone(),
        }
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut TaskModel> {
        [
            &mut self.plan_task,
            &mut self.submit_task,
            &mut self.warmup_task,
            self.starting.task_mut(),
            self.ending.task_mut(),
        ]
        .into_iter()
        .find(|task| task.id() == id)
    }

    fn fail(&mut self, err: TaskError) -> Vec<Cmd> {
        if self.is_finished() {
            debug!(error = %err, "Ignoring error after the run ended");
            return Vec::new();
        }

        error!(error = %err, phase = ?self.phase, "Run failed");
        if let Some(task) = err.task.and_then(|id| self.task_mut(id)) {
            task.finish(false);
        }
        self.phase = Phase::Failed;
        self.failure = Some(err);
        vec![Cmd::quit()]
    }

    /// Attach the error to its row; a failed sibling still counts as done
    fn attach(&mut self, err: TaskError) -> Vec<Cmd> {
        warn!(error = %err, "Task failed");
        let Some(id) = err.task else {
            return Vec::new();
        };

        let text = err.to_string();
        match self.task_mut(id) {
            Some(task) => task.fail(text),
            None => warn!("Error for unknown task"),
        }

        if id == self.submit_task.id() {
            self.plan_finished = true;
        } else if id == self.warmup_task.id() {
            self.warmup_finished = true;
        } else {
            return Vec::new();
        }

        if self.is_finished() {
            return Vec::new();
        }
        self.check_barrier()
    }

    /// Fires once both sides are done, whichever finished second
    fn check_barrier(&mut self) -> Vec<Cmd> {
        if self.barrier_fired || !(self.plan_finished && self.warmup_finished) {
            return Vec::new();
        }
        self.barrier_fired = true;
        self.enter_starting()
    }

    fn enter_starting(&mut self) -> Vec<Cmd> {
        info!("Starting change");
        self.phase = Phase::Starting;

        let mut cmds: Vec<Cmd> = self.starting.start().into_iter().collect();
        if let Some(tx) = self.starting_channel.take_sender() {
            let ctx = self.worker_context();
            let id = self.starting.id();
            cmds.push(Cmd::task(async move {
                lifecycle::start_change(ctx, id, tx).await;
                None
            }));
        }
        cmds.push(self.starting_channel.wait());
        cmds
    }

    fn starting_finished(&mut self) -> Vec<Cmd> {
        if self.invocation.needs_approval() {
            info!("Waiting for approval");
            self.phase = Phase::AwaitingApproval;
            return Vec::new();
        }
        self.phase = Phase::Applying;
        // deferred so the header is drawn before the terminal is handed off
        vec![Cmd::msg(Msg::RunApply)]
    }

    fn on_key(&mut self, code: KeyCode) -> Vec<Cmd> {
        if self.phase != Phase::AwaitingApproval {
            return Vec::new();
        }
        match code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                info!("Apply approved");
                self.phase = Phase::Applying;
                vec![Cmd::msg(Msg::RunApply)]
            }
            KeyCode::Char('n') | KeyCode::Char('N') => {
                info!("Apply declined");
                vec![Cmd::quit()]
            }
            _ => Vec::new(),
        }
    }

    fn run_apply(&mut self) -> Vec<Cmd> {
        if self.apply_launched {
            warn!("Apply already launched");
            return Vec::new();
        }
        self.apply_launched = true;
        self.phase = Phase::Applying;

        let mut command = Command::new(&self.settings.apply_binary);
        command.args(&self.invocation.apply_args);
        if let Some(profile) = self.settings.aws_profile.as_deref().filter(|p| !p.is_empty()) {
            command.env("AWS_PROFILE", profile);
        }
        info!(
            binary = %self.settings.apply_binary,
            args = %self.invocation.apply_args.join(" "),
            "Running apply"
        );

        let token = self.token.clone();
        vec![Cmd::exec(command, move |status| {
            let err = match status {
                Ok(status) if status.success() => return Msg::ApplyFinished,
                // killed on cancellation; the run is aborted, not failed
                Err(_) if token.is_cancelled() => return Msg::Quit,
                Ok(status) => anyhow!("{}", status),
                Err(e) => anyhow::Error::from(e),
            };
            Msg::fatal(None, err.context("failed to run terraform apply"))
        })]
    }

    fn enter_ending(&mut self) -> Vec<Cmd> {
        if self.phase != Phase::Applying {
            warn!(phase = ?self.phase, "Unexpected apply completion");
            return Vec::new();
        }
        let Some(change) = self.change else {
            return self.fail(TaskError::new(
                Some(self.ending.id()),
                anyhow!("no change was identified before apply"),
            ));
        };

        info!(%change, "Ending change");
        self.phase = Phase::Ending;

        let mut cmds: Vec<Cmd> = self.ending.start().into_iter().collect();
        if let Some(tx) = self.ending_channel.take_sender() {
            let ctx = self.worker_context();
            let id = self.ending.id();
            cmds.push(Cmd::task(async move {
                lifecycle::end_change(ctx, change, id, tx).await;
                None
            }));
        }
        cmds.push(self.ending_channel.wait());
        cmds
    }

    /// Fan the message into every row
    fn forward(&mut self, msg: &Msg) -> Vec<Cmd> {
        let mut cmds = Vec::new();
        cmds.extend(self.plan_task.update(msg));
        cmds.extend(self.submit_task.update(msg));
        cmds.extend(self.warmup_task.update(msg));
        cmds.extend(self.starting.update(msg));
        cmds.extend(self.ending.update(msg));

        // every row answers the quit key; one request is enough
        if matches!(msg, Msg::Key(_)) && cmds.len() > 1 {
            cmds.truncate(1);
        }
        cmds
    }

    fn push_row(bits: &mut Vec<String>, task: &TaskModel, line: String) {
        if task.status() == TaskStatus::Pending {
            return;
        }
        bits.push(line);
        if let Some(err) = task.error() {
            bits.push(format!("   {}", err));
        }
    }
}

impl Model for ApplyModel {
    fn init(&mut self) -> Vec<Cmd> {
        self.phase = Phase::Preparing;

        let mut cmds = vec![wait_for_cancellation(self.token.clone())];
        cmds.extend(self.warmup_task.start());
        cmds.push(tasks::warmup(self.service.clone(), self.warmup_task.id()));

        if self.invocation.needs_plan() {
            cmds.extend(self.plan_task.start());
            cmds.push(tasks::generate_plan(
                self.plan_tool.clone(),
                self.invocation.plan_args.clone(),
                self.plan_task.id(),
            ));
        } else {
            info!(plan = %self.invocation.plan.path().display(), "Using saved plan");
            self.plan_task.skip();
            self.submit_task.skip();
        }
        cmds
    }

    fn update(&mut self, msg: Msg) -> Vec<Cmd> {
        let msg = match msg {
            Msg::Fatal(err) => return self.fail(err),
            Msg::NonFatal(err) => return self.attach(err),
            Msg::Quit => {
                if !self.is_finished() {
                    info!(phase = ?self.phase, "Run aborted");
                }
                return Vec::new();
            }
            msg => msg,
        };

        if self.is_finished() {
            return self.forward(&msg);
        }

        let mut cmds = Vec::new();
        match &msg {
            Msg::PlanFinished => {
                self.plan_task.finish(true);
                cmds.extend(self.submit_task.start());
                cmds.push(tasks::submit_plan(
                    self.worker_context(),
                    self.submit_task.id(),
                ));
            }
            Msg::SubmitFinished => {
                self.submit_task.finish(true);
                self.plan_finished = true;
                cmds.extend(self.check_barrier());
            }
            Msg::WarmupFinished => {
                self.warmup_task.finish(true);
                self.warmup_finished = true;
                cmds.extend(self.check_barrier());
            }
            Msg::ChangeIdentified(change) => {
                match self.change {
                    None => self.change = Some(*change),
                    Some(existing) => warn!(%existing, new = %change, "Change already identified"),
                }
                cmds.push(self.starting_channel.wait());
            }
            Msg::Snapshot { id, event } if *id == self.starting.id() => {
                if event.is_finish() {
                    cmds.extend(self.starting_finished());
                } else {
                    cmds.push(self.starting_channel.wait());
                }
            }
            Msg::Snapshot { id, event } if *id == self.ending.id() => {
                if event.is_finish() {
                    info!("Change ended");
                    self.phase = Phase::Done;
                    cmds.push(Cmd::quit());
                } else {
                    cmds.push(self.ending_channel.wait());
                }
            }
            Msg::RunApply => cmds.extend(self.run_apply()),
            Msg::ApplyFinished => cmds.extend(self.enter_ending()),
            Msg::Key(key) => cmds.extend(self.on_key(key.code)),
            _ => {}
        }

        cmds.extend(self.forward(&msg));
        cmds
    }

    fn view(&self) -> String {
        let mut bits = Vec::new();

        for task in [&self.plan_task, &self.submit_task, &self.warmup_task] {
            Self::push_row(&mut bits, task, task.view());
        }

        if self.barrier_fired {
            bits.push(String::new());
            bits.extend(self.header.lines().map(str::to_string));
            bits.push(String::new());
            Self::push_row(&mut bits, self.starting.task(), self.starting.view());
            Self::push_row(&mut bits, self.ending.task(), self.ending.view());
        }

        if self.phase == Phase::AwaitingApproval {
            bits.push(String::new());
            bits.push("Do you want to apply these changes? [y/n]".to_string());
        }

        if let Some(err) = &self.failure {
            bits.push(format!("⛔️ {}", err));
        }

        bits.join("\n") + "\n"
    }
}
