use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::BusError;

/// An inbound unit of work from the bus. `thread_id` and `sender_id` must be
/// carried unchanged into the corresponding reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
}

/// Reply posted back into a thread, addressed to the original sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    pub thread_id: String,
    pub mentions: Vec<String>,
    pub content: String,
}

/// Lifecycle of one bus connection. The disconnected/connecting phases have
/// no representation here: a session value only exists once the transport is
/// established. A `Failed` handle is discarded and replaced, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Closed,
    Failed,
}

/// A live, single-use mention stream plus the reply channel back into the
/// bus. Implementations never reconnect internally; reconnection policy
/// belongs to the driver that owns the session.
#[async_trait]
pub trait MentionStream: Send {
    /// Wait up to `timeout` for the next mention addressed to this worker.
    /// `Ok(None)` means the timeout elapsed, which is not an error.
    async fn next_mention(&mut self, timeout: Duration) -> Result<Option<Mention>, BusError>;

    /// Send `content` into `thread_id`, addressed to `sender_id`.
    async fn reply(
        &mut self,
        thread_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<(), BusError>;

    /// Release the connection. Idempotent.
    async fn close(&mut self);
}

/// Opens fresh bus sessions.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MentionStream>, BusError>;
}

/// One server-sent event, assembled from `event:`/`data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub name: Option<String>,
    pub data: String,
}

/// Incremental SSE frame parser. Bytes go in chunk by chunk (in whatever
/// sizes the transport delivers), complete events come out.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline);

            if line.is_empty() {
                // Blank line terminates an event.
                if !self.data_lines.is_empty() {
                    events.push(SseEvent {
                        name: self.event_name.take(),
                        data: self.data_lines.join("\n"),
                    });
                    self.data_lines.clear();
                } else {
                    self.event_name = None;
                }
                continue;
            }

            if line.starts_with(':') {
                continue; // comment / keep-alive
            }

            if let Some(name) = line.strip_prefix("event:") {
                self.event_name = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // id: and retry: fields are ignored
        }
        events
    }
}

/// Interpret one SSE event. `Ok(None)` for frames that are not mentions
/// (pings, status events); `Err` for mention frames that fail to parse.
fn mention_from_event(event: &SseEvent) -> Result<Option<Mention>, BusError> {
    match event.name.as_deref() {
        Some("mention") | None => {}
        _ => return Ok(None),
    }
    if event.data.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Mention>(&event.data)
        .map(Some)
        .map_err(|e| BusError::Protocol(e.to_string()))
}

fn join_endpoint(base: &Url, segment: &str) -> Result<Url, BusError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| BusError::Connection(format!("endpoint '{base}' cannot take a path")))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

type FrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, BusError>> + Send>>;

/// Production bus transport: mentions arrive over a long-lived SSE stream at
/// `{endpoint}/sse`, replies go out as JSON posts to `{endpoint}/messages`.
pub struct SseBus {
    http: reqwest::Client,
    endpoint: Url,
    agent_id: String,
    agent_description: String,
}

impl SseBus {
    pub fn new(
        endpoint: Url,
        agent_id: String,
        agent_description: String,
        read_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            agent_id,
            agent_description,
        })
    }

    fn sse_url(&self) -> Result<Url, BusError> {
        let mut url = join_endpoint(&self.endpoint, "sse")?;
        url.query_pairs_mut()
            .append_pair("agentId", &self.agent_id)
            .append_pair("agentDescription", &self.agent_description);
        Ok(url)
    }

    fn post_url(&self) -> Result<Url, BusError> {
        join_endpoint(&self.endpoint, "messages")
    }
}

#[async_trait]
impl BusConnector for SseBus {
    async fn connect(&self) -> Result<Box<dyn MentionStream>, BusError> {
        let url = self.sse_url()?;
        debug!(%url, "Opening mention stream");

        let response = self
            .http
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BusError::Connection(format!(
                "bus returned HTTP {}",
                response.status()
            )));
        }

        info!(agent = %self.agent_id, "Connected to mention bus");

        let stream: FrameStream = Box::pin(
            response
                .bytes_stream()
                .map_ok(|chunk| chunk.to_vec())
                .map_err(|e| BusError::Connection(e.to_string())),
        );

        Ok(Box::new(SseSession {
            http: self.http.clone(),
            post_url: self.post_url()?,
            stream: Some(stream),
            parser: SseParser::default(),
            pending: VecDeque::new(),
            state: SessionState::Connected,
        }))
    }
}

/// One live SSE connection. Owned by a single driver; dropped on failure.
pub struct SseSession {
    http: reqwest::Client,
    post_url: Url,
    stream: Option<FrameStream>,
    parser: SseParser,
    pending: VecDeque<Mention>,
    state: SessionState,
}

impl SseSession {
    pub fn state(&self) -> SessionState {
        self.state
    }
}

#[async_trait]
impl MentionStream for SseSession {
    async fn next_mention(&mut self, timeout: Duration) -> Result<Option<Mention>, BusError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(mention) = self.pending.pop_front() {
                return Ok(Some(mention));
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(BusError::StreamClosed),
            };

            let chunk = match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) => return Ok(None), // timeout elapsed: not an error
                Ok(None) => {
                    self.state = SessionState::Failed;
                    return Err(BusError::StreamClosed);
                }
                Ok(Some(Err(e))) => {
                    self.state = SessionState::Failed;
                    return Err(e);
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            for event in self.parser.push(&chunk) {
                match mention_from_event(&event) {
                    Ok(Some(mention)) => self.pending.push_back(mention),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping malformed mention frame: {e}"),
                }
            }
        }
    }

    async fn reply(
        &mut self,
        thread_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<(), BusError> {
        let payload = ReplyPayload {
            thread_id: thread_id.to_string(),
            mentions: vec![sender_id.to_string()],
            content: content.to_string(),
        };

        let response = self
            .http
            .post(self.post_url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                self.state = SessionState::Failed;
                BusError::Connection(e.to_string())
            })?;

        if !response.status().is_success() {
            self.state = SessionState::Failed;
            return Err(BusError::Connection(format!(
                "reply rejected with HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.stream = None;
        if self.state == SessionState::Connected {
            self.state = SessionState::Closed;
        }
    }
}
