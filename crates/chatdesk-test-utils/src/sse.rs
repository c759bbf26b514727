//! Minimal Server-Sent Events reader for live-session tests.

use anyhow::{anyhow, Context};
use axum::body::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::time::Duration;

/// One parsed event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Data parsed as JSON.
    pub fn json(&self) -> Result<Value, anyhow::Error> {
        serde_json::from_str(&self.data).context("event data is not JSON")
    }
}

/// Reads events from an open `GET /v1/events` response. Keep-alive comments
/// are skipped.
pub struct EventReader {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: String,
}

impl EventReader {
    /// Open a live session with `token`.
    pub async fn open(
        client: &reqwest::Client,
        base_url: &str,
        token: &str,
    ) -> Result<Self, anyhow::Error> {
        let response = client
            .get(format!("{base_url}/v1/events"))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("event stream refused with {}", status));
        }

        Ok(Self {
            body: response.bytes_stream().boxed(),
            buffer: String::new(),
        })
    }

    /// Next event, or `None` when the server closed the stream.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, anyhow::Error> {
        loop {
            if let Some(block) = self.take_block() {
                if let Some(event) = parse_block(&block) {
                    return Ok(Some(event));
                }
                continue;
            }

            match self.body.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.buffer
                        .push_str(&String::from_utf8_lossy(chunk.as_ref()).replace("\r\n", "\n"));
                }
                None => return Ok(None),
            }
        }
    }

    /// Next event within `timeout`. Errors on timeout.
    pub async fn next_event_within(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<SseEvent>, anyhow::Error> {
        tokio::time::timeout(timeout, self.next_event())
            .await
            .map_err(|_| anyhow!("no event within {:?}", timeout))?
    }

    /// Next `message` event's data as JSON, within `timeout`.
    pub async fn next_message(&mut self, timeout: Duration) -> Result<Value, anyhow::Error> {
        loop {
            let event = self
                .next_event_within(timeout)
                .await?
                .context("event stream closed")?;
            if event.event.as_deref() == Some("message") {
                return event.json();
            }
        }
    }

    /// True if no event arrives within `window`.
    pub async fn is_quiet_for(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.next_event()).await.is_err()
    }

    fn take_block(&mut self) -> Option<String> {
        let end = self.buffer.find("\n\n")?;
        let block: String = self.buffer.drain(..end + 2).collect();
        Some(block)
    }
}

/// Parse one event block. Comment-only blocks yield `None`.
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut id = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && id.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        id,
        data: data.join("\n"),
    })
}
