//! Single-threaded event loop.
//!
//! The loop owns the model. It dequeues one message at a time, hands it
//! to [`Model::update`], redraws, and spawns the returned commands. A
//! command never touches the model; it resolves to a message that is
//! sent back to the inbox.

use std::io;
use std::process::{ExitStatus, Stdio};

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{Cmd, ExecCommand, Msg};
use crate::ui::Renderer;

/// Capacity of the loop inbox
const INBOX_CAPACITY: usize = 64;

/// State machine driven by the loop
pub trait Model {
    /// Commands to run before the first message
    fn init(&mut self) -> Vec<Cmd>;

    /// Apply one message; must not block
    fn update(&mut self, msg: Msg) -> Vec<Cmd>;

    fn view(&self) -> String;
}

pub struct Program<R: Renderer> {
    renderer: R,
    token: CancellationToken,
    tx: mpsc::Sender<Msg>,
    rx: mpsc::Receiver<Msg>,
    tasks: JoinSet<()>,
    key_reader: Option<JoinHandle<()>>,
    suspended: bool,
}

impl<R: Renderer> Program<R> {
    pub fn new(renderer: R, token: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        Self {
            renderer,
            token,
            tx,
            rx,
            tasks: JoinSet::new(),
            key_reader: None,
            suspended: false,
        }
    }

    /// Inject messages from outside the loop
    pub fn sender(&self) -> mpsc::Sender<Msg> {
        self.tx.clone()
    }

    /// Run until the model asks to quit; returns the final model
    pub async fn run<M: Model>(mut self, mut model: M) -> Result<M> {
        self.renderer.start()?;
        if self.renderer.interactive() {
            self.start_key_reader();
        }

        let cmds = model.init();
        let result = match self.renderer.draw(&model.view()) {
            Ok(()) => {
                for cmd in cmds {
                    self.dispatch(cmd);
                }
                self.event_loop(&mut model).await
            }
            Err(e) => Err(e),
        };

        self.shutdown();
        let finished = self.renderer.finish();
        result?;
        finished?;
        Ok(model)
    }

    async fn event_loop<M: Model>(&mut self, model: &mut M) -> Result<()> {
        while let Some(msg) = self.rx.recv().await {
            self.reap();

            let msg = match msg {
                Msg::ExecFinished(inner) => {
                    self.resume()?;
                    *inner
                }
                msg => msg,
            };

            if matches!(msg, Msg::SpinnerTick(_)) && !self.renderer.interactive() {
                continue;
            }
            if matches!(msg, Msg::Resize) {
                if !self.suspended {
                    self.renderer.draw(&model.view())?;
                }
                continue;
            }

            let quit = matches!(msg, Msg::Quit);
            let cmds = model.update(msg);

            // draw before dispatch so a hand-off leaves the latest frame on screen
            if !self.suspended {
                self.renderer.draw(&model.view())?;
            }
            for cmd in cmds {
                self.dispatch(cmd);
            }

            if quit {
                debug!("Quit requested");
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Task(fut) => {
                let tx = self.tx.clone();
                self.tasks.spawn(async move {
                    if let Some(msg) = fut.await {
                        let _ = tx.send(msg).await;
                    }
                });
            }
            Cmd::Exec(exec) => {
                self.stop_key_reader();
                if let Err(e) = self.renderer.suspend() {
                    warn!(error = %e, "Failed to release terminal");
                }
                self.suspended = true;

                let tx = self.tx.clone();
                let token = self.token.clone();
                self.tasks.spawn(async move {
                    let msg = run_exec(exec, token).await;
                    let _ = tx.send(Msg::ExecFinished(Box::new(msg))).await;
                });
            }
        }
    }

    fn resume(&mut self) -> Result<()> {
        if !self.suspended {
            return Ok(());
        }
        self.renderer.resume()?;
        self.suspended = false;
        if self.renderer.interactive() {
            self.start_key_reader();
        }
        Ok(())
    }

    /// Collect finished commands so the set does not grow for the whole run
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(error = %e, "Command panicked");
                }
            }
        }
    }

    fn start_key_reader(&mut self) {
        if self.key_reader.is_some() {
            return;
        }

        let tx = self.tx.clone();
        let token = self.token.clone();
        self.key_reader = Some(tokio::spawn(async move {
            let mut events = EventStream::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        // raw mode swallows SIGINT
                        if key.code == KeyCode::Char('c')
                            && key.modifiers.contains(KeyModifiers::CONTROL)
                        {
                            info!("Interrupted from keyboard");
                            token.cancel();
                            continue;
                        }
                        if tx.send(Msg::Key(key)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Resize(..)) => {
                        if tx.send(Msg::Resize).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to read terminal events");
                        break;
                    }
                }
            }
        }));
    }

    fn stop_key_reader(&mut self) {
        if let Some(reader) = self.key_reader.take() {
            reader.abort();
        }
    }

    fn shutdown(&mut self) {
        self.token.cancel();
        self.stop_key_reader();
        self.tasks.abort_all();
    }
}

/// Run a child on the inherited terminal until it exits or the run is
/// cancelled
async fn run_exec(exec: ExecCommand, token: CancellationToken) -> Msg {
    let ExecCommand {
        mut command,
        on_exit,
    } = exec;

    command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    info!(%program, "Handing terminal to subprocess");

    let status: io::Result<ExitStatus> = match command.spawn() {
        Ok(mut child) => tokio::select! {
            status = child.wait() => status,
            _ = token.cancelled() => {
                warn!(%program, "Cancelled, killing subprocess");
                let _ = child.kill().await;
                Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"))
            }
        },
        Err(e) => Err(e),
    };

    debug!(%program, ?status, "Subprocess finished");
    on_exit(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::core::messages::TaskId;

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<String>>>,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    struct RecordingRenderer(Recorder);

    impl Renderer for RecordingRenderer {
        fn interactive(&self) -> bool {
            false
        }

        fn draw(&mut self, view: &str) -> Result<()> {
            self.0.frames.lock().unwrap().push(view.to_string());
            Ok(())
        }

        fn suspend(&mut self) -> Result<()> {
            self.0.events.lock().unwrap().push("suspend");
            Ok(())
        }

        fn resume(&mut self) -> Result<()> {
            self.0.events.lock().unwrap().push("resume");
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.0.events.lock().unwrap().push("finish");
            Ok(())
        }
    }

    /// Counts messages; quits on the first `ApplyFinished` or `Fatal`
    struct Counter {
        init: Vec<Cmd>,
        seen: Vec<String>,
    }

    impl Counter {
        fn new(init: Vec<Cmd>) -> Self {
            Self {
                init,
                seen: Vec::new(),
            }
        }
    }

    impl Model for Counter {
        fn init(&mut self) -> Vec<Cmd> {
            std::mem::take(&mut self.init)
        }

        fn update(&mut self, msg: Msg) -> Vec<Cmd> {
            let quit = matches!(msg, Msg::ApplyFinished | Msg::Fatal(_));
            self.seen.push(format!("{:?}", msg));
            if quit {
                vec![Cmd::quit()]
            } else {
                Vec::new()
            }
        }

        fn view(&self) -> String {
            format!("seen {}", self.seen.len())
        }
    }

    fn program(recorder: &Recorder) -> Program<RecordingRenderer> {
        Program::new(RecordingRenderer(recorder.clone()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_task_results_are_dispatched_until_quit() {
        let recorder = Recorder::default();
        let model = Counter::new(vec![
            Cmd::msg(Msg::WarmupFinished),
            Cmd::task(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some(Msg::ApplyFinished)
            }),
        ]);

        let model = tokio::time::timeout(Duration::from_secs(5), program(&recorder).run(model))
            .await
            .unwrap()
            .unwrap();

        assert!(model.seen.iter().any(|m| m == "WarmupFinished"));
        assert_eq!(model.seen.last().map(String::as_str), Some("Quit"));
        assert_eq!(recorder.frames.lock().unwrap()[0], "seen 0");
        assert_eq!(*recorder.events.lock().unwrap(), vec!["finish"]);
    }

    #[tokio::test]
    async fn test_spinner_ticks_dropped_without_terminal() {
        let recorder = Recorder::default();
        let model = Counter::new(vec![
            Cmd::msg(Msg::SpinnerTick(TaskId::next())),
            Cmd::task(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some(Msg::Quit)
            }),
        ]);

        let model = program(&recorder).run(model).await.unwrap();
        assert_eq!(model.seen, vec!["Quit"]);
    }

    #[tokio::test]
    async fn test_external_sender_reaches_model() {
        let recorder = Recorder::default();
        let program = program(&recorder);
        let tx = program.sender();
        tx.send(Msg::PlanFinished).await.unwrap();
        tx.send(Msg::Quit).await.unwrap();

        let model = program.run(Counter::new(Vec::new())).await.unwrap();
        assert_eq!(model.seen, vec!["PlanFinished", "Quit"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_suspends_and_resumes_renderer() {
        let recorder = Recorder::default();
        let exec = Cmd::exec(tokio::process::Command::new("true"), |status| match status {
            Ok(s) if s.success() => Msg::ApplyFinished,
            Ok(s) => Msg::fatal(None, anyhow::anyhow!("{}", s)),
            Err(e) => Msg::fatal(None, e.into()),
        });

        let model = tokio::time::timeout(
            Duration::from_secs(5),
            program(&recorder).run(Counter::new(vec![exec])),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(model.seen, vec!["ApplyFinished", "Quit"]);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["suspend", "resume", "finish"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_failure_reaches_model() {
        let recorder = Recorder::default();
        let exec = Cmd::exec(tokio::process::Command::new("false"), |status| match status {
            Ok(s) if s.success() => Msg::ApplyFinished,
            Ok(s) => Msg::fatal(None, anyhow::anyhow!("{}", s)),
            Err(e) => Msg::fatal(None, e.into()),
        });

        let model = program(&recorder)
            .run(Counter::new(vec![exec]))
            .await
            .unwrap();
        assert!(model.seen[0].starts_with("Fatal"));
    }
}
