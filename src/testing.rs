//! In-memory collaborators for exercising the orchestrator without a
//! change service or a terraform binary.
//!
//! Both fakes record the calls they receive so tests can assert on the
//! sequence the orchestrator produced.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use uuid::Uuid;

use crate::adapters::{ChangeService, PlanTool, ProgressStream};
use crate::domain::{ChangeId, ChangeProgress};

/// How a fake progress stream ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamEnd {
    /// Clean closure after the scripted messages
    #[default]
    Close,
    /// An error after the scripted messages
    Fail,
    /// Never ends after the scripted messages
    Hang,
}

#[derive(Default)]
pub struct FakeService {
    change: Uuid,
    identify_fails: bool,
    start_progress: Vec<ChangeProgress>,
    start_end: StreamEnd,
    end_progress: Vec<ChangeProgress>,
    end_end: StreamEnd,
    submit_fails: bool,
    warmup_fails: bool,
    warmup_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            change: Uuid::new_v4(),
            ..Default::default()
        }
    }

    pub fn with_start_progress(mut self, progress: Vec<(&str, u32, u32)>) -> Self {
        self.start_progress = to_progress(progress);
        self
    }

    pub fn with_end_progress(mut self, progress: Vec<(&str, u32, u32)>) -> Self {
        self.end_progress = to_progress(progress);
        self
    }

    pub fn failing_identify(mut self) -> Self {
        self.identify_fails = true;
        self
    }

    pub fn failing_start_stream(mut self) -> Self {
        self.start_end = StreamEnd::Fail;
        self
    }

    pub fn failing_end_stream(mut self) -> Self {
        self.end_end = StreamEnd::Fail;
        self
    }

    pub fn hanging_start_stream(mut self) -> Self {
        self.start_end = StreamEnd::Hang;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.submit_fails = true;
        self
    }

    pub fn failing_warmup(mut self) -> Self {
        self.warmup_fails = true;
        self
    }

    /// Delay warm-up completion, e.g. until after planning finished
    pub fn with_warmup_delay(mut self, delay: Duration) -> Self {
        self.warmup_delay = Some(delay);
        self
    }

    pub fn change_id(&self) -> ChangeId {
        ChangeId::new(self.change)
    }

    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: impl Into<String>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.into());
        }
    }
}

fn to_progress(progress: Vec<(&str, u32, u32)>) -> Vec<ChangeProgress> {
    progress
        .into_iter()
        .map(|(state, items, edges)| ChangeProgress::new(state, items, edges))
        .collect()
}

fn scripted(progress: Vec<ChangeProgress>, end: StreamEnd) -> ProgressStream {
    let messages = stream::iter(progress.into_iter().map(Ok));
    match end {
        StreamEnd::Close => messages.boxed(),
        StreamEnd::Fail => messages
            .chain(stream::once(async { Err(anyhow!("stream reset by peer")) }))
            .boxed(),
        StreamEnd::Hang => messages.chain(stream::pending()).boxed(),
    }
}

#[async_trait]
impl ChangeService for FakeService {
    fn name(&self) -> &str {
        "fake"
    }

    async fn identify_change(&self, ticket_link: &str) -> Result<ChangeId> {
        self.record(format!("identify:{}", ticket_link));
        if self.identify_fails {
            return Err(anyhow!("change service unavailable"));
        }
        Ok(self.change_id())
    }

    async fn start_change(&self, change: ChangeId) -> Result<ProgressStream> {
        self.record(format!("start:{}", change));
        Ok(scripted(self.start_progress.clone(), self.start_end))
    }

    async fn end_change(&self, change: ChangeId) -> Result<ProgressStream> {
        self.record(format!("end:{}", change));
        Ok(scripted(self.end_progress.clone(), self.end_end))
    }

    async fn submit_plan(&self, ticket_link: &str, _plan_file: &Path) -> Result<()> {
        self.record(format!("submit:{}", ticket_link));
        if self.submit_fails {
            return Err(anyhow!("plan rejected"));
        }
        Ok(())
    }

    async fn warmup(&self) -> Result<()> {
        if let Some(delay) = self.warmup_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("warmup");
        if self.warmup_fails {
            return Err(anyhow!("warm-up timed out"));
        }
        Ok(())
    }
}

pub struct FakePlanTool {
    generate_fails: bool,
    ticket_link: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakePlanTool {
    fn default() -> Self {
        Self {
            generate_fails: false,
            ticket_link: Some("tfplan://fake".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakePlanTool {
    pub fn failing_generate(mut self) -> Self {
        self.generate_fails = true;
        self
    }

    pub fn without_ticket_link(mut self) -> Self {
        self.ticket_link = None;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: impl Into<String>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.into());
        }
    }
}

#[async_trait]
impl PlanTool for FakePlanTool {
    fn name(&self) -> &str {
        "fake"
    }

    /// Writes a small plan to the `-out` path
    async fn generate(&self, plan_args: &[String]) -> Result<()> {
        self.record("generate");
        if self.generate_fails {
            return Err(anyhow!("Error: Invalid provider configuration"));
        }

        let out = plan_args
            .iter()
            .position(|a| a == "-out")
            .and_then(|idx| plan_args.get(idx + 1));
        if let Some(path) = out {
            tokio::fs::write(path, b"fake plan").await?;
        }
        Ok(())
    }

    async fn ticket_link(&self, _plan_file: &Path) -> Result<String> {
        self.record("ticket_link");
        self.ticket_link
            .clone()
            .ok_or_else(|| anyhow!("no ticket link embedded in plan"))
    }
}
