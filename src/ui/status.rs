//! Status primitive: one unit of work rendered as a glyph plus title.

use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent};

use crate::core::messages::{Cmd, Msg, TaskId};

/// Moon spinner frames
const SPINNER_FRAMES: [&str; 8] = ["🌑", "🌒", "🌓", "🌔", "🌕", "🌖", "🌗", "🌘"];

/// Time between spinner frames
const SPINNER_INTERVAL: Duration = Duration::from_millis(125);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
    Skipped,
}

impl TaskStatus {
    /// Done, Error and Skipped are final for the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Skipped)
    }
}

/// A titled task with an animated indicator while it runs
#[derive(Debug, Clone)]
pub struct TaskModel {
    id: TaskId,
    status: TaskStatus,
    title: String,
    frame: usize,
    error: Option<String>,
}

impl TaskModel {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: TaskId::next(),
            status: TaskStatus::Pending,
            title: title.into(),
            frame: 0,
            error: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Pending -> Running. Returns the first spinner tick.
    pub fn start(&mut self) -> Option<Cmd> {
        if self.status != TaskStatus::Pending {
            return None;
        }
        self.status = TaskStatus::Running;
        Some(self.tick())
    }

    pub fn finish(&mut self, ok: bool) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if ok {
            TaskStatus::Done
        } else {
            TaskStatus::Error
        };
    }

    /// Mark as failed and keep the error text for display
    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(false);
        self.error = Some(error.into());
    }

    pub fn skip(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Skipped;
    }

    pub fn update(&mut self, msg: &Msg) -> Option<Cmd> {
        match msg {
            Msg::Key(key) if is_quit_key(key) => Some(Cmd::quit()),
            Msg::SpinnerTick(id) if *id == self.id && self.status == TaskStatus::Running => {
                self.frame = (self.frame + 1) % SPINNER_FRAMES.len();
                Some(self.tick())
            }
            _ => None,
        }
    }

    pub fn view(&self) -> String {
        match self.status {
            TaskStatus::Pending => format!("⏳ {}", self.title),
            TaskStatus::Running => format!("{} {}", SPINNER_FRAMES[self.frame], self.title),
            TaskStatus::Done => format!("✅ {}", self.title),
            TaskStatus::Error => format!("⛔️ {}", self.title),
            TaskStatus::Skipped => format!("-- {}", self.title),
        }
    }

    fn tick(&self) -> Cmd {
        let id = self.id;
        Cmd::task(async move {
            tokio::time::sleep(SPINNER_INTERVAL).await;
            Some(Msg::SpinnerTick(id))
        })
    }
}

fn is_quit_key(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('q')
}
