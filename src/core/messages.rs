//! Messages and commands exchanged between the event loop and
//! background operations.
//!
//! Background operations never touch loop-owned state. They resolve to a
//! [`Msg`] which the loop hands to the model's `update`, which in turn
//! returns further [`Cmd`]s.

use std::fmt;
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};

use crossterm::event::KeyEvent;
use futures_util::future::BoxFuture;
use tokio::process::Command;

use crate::domain::ChangeId;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity token of a rendered task.
///
/// Messages addressed to a task carry its id so a shared message stream
/// can be fanned into every component and ignored by the ones it does
/// not address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// An error tied to the task it came from
#[derive(Debug)]
pub struct TaskError {
    pub task: Option<TaskId>,
    pub error: anyhow::Error,
}

impl TaskError {
    pub fn new(task: Option<TaskId>, error: anyhow::Error) -> Self {
        Self { task, error }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

/// Progress events for a snapshot row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEvent {
    Start {
        phase: String,
    },
    Progress {
        phase: String,
        items: u32,
        edges: u32,
    },
    Finish {
        phase: String,
        items: u32,
        edges: u32,
    },
}

impl SnapshotEvent {
    pub fn is_finish(&self) -> bool {
        matches!(self, SnapshotEvent::Finish { .. })
    }
}

/// Every message the loop can dispatch
#[derive(Debug)]
pub enum Msg {
    /// A key pressed while the live display owns the terminal
    Key(KeyEvent),

    /// The terminal changed size; redraw only
    Resize,

    /// Advance the spinner of one task
    SpinnerTick(TaskId),

    PlanFinished,
    SubmitFinished,
    WarmupFinished,

    /// The start-change worker obtained the change id
    ChangeIdentified(ChangeId),

    Snapshot {
        id: TaskId,
        event: SnapshotEvent,
    },

    /// Launch the apply subprocess
    RunApply,
    ApplyFinished,

    /// Aborts the run
    Fatal(TaskError),

    /// Attached to the originating task only
    NonFatal(TaskError),

    /// A handed-off subprocess exited; the terminal is ours again
    ExecFinished(Box<Msg>),

    Quit,
}

impl Msg {
    pub fn snapshot(id: TaskId, event: SnapshotEvent) -> Self {
        Msg::Snapshot { id, event }
    }

    pub fn fatal(task: Option<TaskId>, error: anyhow::Error) -> Self {
        Msg::Fatal(TaskError::new(task, error))
    }

    pub fn non_fatal(task: Option<TaskId>, error: anyhow::Error) -> Self {
        Msg::NonFatal(TaskError::new(task, error))
    }
}

/// Callback turning a subprocess exit into a message
pub type ExitHandler = Box<dyn FnOnce(io::Result<ExitStatus>) -> Msg + Send>;

/// A subprocess that takes over the terminal until it exits
pub struct ExecCommand {
    pub command: Command,
    pub on_exit: ExitHandler,
}

/// A follow-up operation returned by `update`
pub enum Cmd {
    /// Runs concurrently with the loop; its output, if any, is dispatched
    Task(BoxFuture<'static, Option<Msg>>),

    /// Interactive hand-off to a child process
    Exec(ExecCommand),
}

impl Cmd {
    pub fn task<F>(fut: F) -> Self
    where
        F: Future<Output = Option<Msg>> + Send + 'static,
    {
        Cmd::Task(Box::pin(fut))
    }

    /// Dispatch `msg` on a later loop iteration
    pub fn msg(msg: Msg) -> Self {
        Cmd::task(async move { Some(msg) })
    }

    pub fn quit() -> Self {
        Cmd::msg(Msg::Quit)
    }

    pub fn exec<F>(command: Command, on_exit: F) -> Self
    where
        F: FnOnce(io::Result<ExitStatus>) -> Msg + Send + 'static,
    {
        Cmd::Exec(ExecCommand {
            command,
            on_exit: Box::new(on_exit),
        })
    }

    pub fn is_exec(&self) -> bool {
        matches!(self, Cmd::Exec(_))
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cmd::Task(_) => f.write_str("Cmd::Task"),
            Cmd::Exec(exec) => f
                .debug_tuple("Cmd::Exec")
                .field(&exec.command.as_std().get_program())
                .finish(),
        }
    }
}
