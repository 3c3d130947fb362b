//! HTTP change service adapter.
//!
//! Requests are JSON; start/end change responses are newline-delimited
//! JSON, one [`ChangeProgress`] per line, streamed until the server
//! closes the body.

use std::path::Path;
use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{ChangeService, ProgressStream};
use crate::domain::{ChangeId, ChangeProgress};

/// Errors that can occur talking to the change service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("invalid progress message: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct IdentifyRequest<'a> {
    ticket_link: &'a str,
    status: &'a str,
    create_if_missing: bool,
}

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    change_id: Uuid,
}

/// Change service reached over HTTP
pub struct HttpChangeService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChangeService {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("changeflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.client.post(self.url(path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                endpoint: endpoint.to_string(),
                status,
                body: body.trim().to_string(),
            });
        }
        Ok(response)
    }

    async fn progress(&self, endpoint: &str, path: &str) -> Result<ProgressStream> {
        let response = self.send(endpoint, self.post(path)).await?;
        Ok(decode_progress(response.bytes_stream()).boxed())
    }
}

#[async_trait]
impl ChangeService for HttpChangeService {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self))]
    async fn identify_change(&self, ticket_link: &str) -> Result<ChangeId> {
        let request = self.post("api/changes/identify").json(&IdentifyRequest {
            ticket_link,
            status: "defining",
            create_if_missing: true,
        });
        let response: IdentifyResponse = self
            .send("identify", request)
            .await?
            .json()
            .await
            .map_err(ServiceError::from)?;

        debug!(change = %response.change_id, "Identified change");
        Ok(ChangeId::new(response.change_id))
    }

    async fn start_change(&self, change: ChangeId) -> Result<ProgressStream> {
        self.progress("start change", &format!("api/changes/{}/start", change))
            .await
    }

    async fn end_change(&self, change: ChangeId) -> Result<ProgressStream> {
        self.progress("end change", &format!("api/changes/{}/end", change))
            .await
    }

    #[instrument(skip(self))]
    async fn submit_plan(&self, ticket_link: &str, plan_file: &Path) -> Result<()> {
        let plan = tokio::fs::read(plan_file)
            .await
            .with_context(|| format!("Failed to read plan file: {}", plan_file.display()))?;

        let request = self
            .post("api/changes/plans")
            .query(&[("ticket_link", ticket_link)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(plan);
        self.send("submit plan", request).await?;
        Ok(())
    }

    async fn warmup(&self) -> Result<()> {
        self.send("warmup", self.post("api/revlink/warmup")).await?;
        Ok(())
    }
}

struct Decoder<S> {
    chunks: Pin<Box<S>>,
    buf: Vec<u8>,
    done: bool,
}

/// Split a byte stream into newline-delimited progress messages.
///
/// A transport error is yielded once and ends the stream. A final line
/// without a trailing newline is still decoded.
pub fn decode_progress<S, B, E>(chunks: S) -> impl Stream<Item = Result<ChangeProgress>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<anyhow::Error> + Send,
{
    let decoder = Decoder {
        chunks: Box::pin(chunks),
        buf: Vec::new(),
        done: false,
    };

    stream::unfold(decoder, |mut d| async move {
        loop {
            if let Some(pos) = d.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = d.buf.drain(..=pos).collect();
                if let Some(item) = parse_line(&line) {
                    return Some((item, d));
                }
                continue;
            }

            if d.done {
                let rest = std::mem::take(&mut d.buf);
                return parse_line(&rest).map(|item| (item, d));
            }

            match d.chunks.next().await {
                Some(Ok(chunk)) => d.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    d.done = true;
                    d.buf.clear();
                    return Some((Err(e.into()), d));
                }
                None => d.done = true,
            }
        }
    })
}

fn parse_line(line: &[u8]) -> Option<Result<ChangeProgress>> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed).map_err(|e| ServiceError::from(e).into()))
}
