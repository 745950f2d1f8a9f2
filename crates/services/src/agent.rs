//! Agent engine adapter.
//!
//! The engine exposes one streaming endpoint: POST the turn input, read
//! back newline-delimited JSON where each line is one [`AgentEvent`]. The
//! returned stream is finite, non-restartable and cancellable — dropping
//! it aborts the underlying request, which stops further agent work.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use dm_domain::error::{Error, Result};
use dm_domain::stream::{AgentEvent, BoxStream};

use crate::health::ServiceHealth;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait + request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input for one response turn.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStreamRequest {
    pub input_message: String,
    pub session_id: String,
    pub user_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Abstraction over the agent engine (real HTTP client or a test double).
#[async_trait]
pub trait AgentProvider: ServiceHealth {
    /// Start a turn and return its event stream.
    ///
    /// Exactly one `stream_start` and at most one `stream_end` appear per
    /// stream; transport failures surface as `Err` items.
    async fn stream(
        &self,
        req: AgentStreamRequest,
    ) -> Result<BoxStream<'static, Result<AgentEvent>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streams agent events from the engine's NDJSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAgentClient {
    pub fn new(config: &dm_domain::config::AgentServiceConfig) -> Result<Self> {
        // Connect/header timeout only: the body streams for the whole turn.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AgentProvider for HttpAgentClient {
    async fn stream(
        &self,
        req: AgentStreamRequest,
    ) -> Result<BoxStream<'static, Result<AgentEvent>>> {
        let url = format!("{}/v1/agent/stream", self.base_url);
        let mut rb = self.http.post(&url).json(&req);
        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }

        let response = rb
            .send()
            .await
            .map_err(|e| Error::Agent(format!("connect: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("{url} returned {status}: {body}")));
        }

        Ok(ndjson_event_stream(response))
    }
}

#[async_trait]
impl ServiceHealth for HttpAgentClient {
    async fn initialize(&self) -> Result<()> {
        let (healthy, message) = self.is_healthy().await;
        if !healthy {
            return Err(Error::Agent(format!("agent engine unreachable: {message}")));
        }
        Ok(())
    }

    async fn is_healthy(&self) -> (bool, String) {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => (true, "agent reachable".into()),
            Ok(resp) => (false, format!("agent returned {}", resp.status())),
            Err(e) => (false, e.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NDJSON parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull complete lines out of the buffer, leaving any trailing partial
/// line in place for the next chunk.
fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_owned());
        }
    }
    lines
}

/// Parse one NDJSON line into an event, mapping malformed lines to `Err`.
fn parse_event(line: &str) -> Result<AgentEvent> {
    serde_json::from_str::<AgentEvent>(line)
        .map_err(|e| Error::Agent(format!("malformed event: {e}")))
}

/// Build a [`BoxStream`] of agent events from a streaming response body.
///
/// Buffers incoming chunks, drains complete lines, and flushes the residue
/// when the body closes. Transport errors end the stream with one `Err`.
fn ndjson_event_stream(response: reqwest::Response) -> BoxStream<'static, Result<AgentEvent>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for line in drain_lines(&mut buffer) {
                        yield parse_event(&line);
                    }
                }
                Ok(None) => {
                    // Body ended — flush a trailing unterminated line.
                    let residue = buffer.trim().to_owned();
                    if !residue.is_empty() {
                        yield parse_event(&residue);
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Agent(format!("stream: {e}")));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_complete_lines() {
        let mut buf = String::from("{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(drain_lines(&mut buf), vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_keeps_partial_line() {
        let mut buf = String::from("{\"a\":1}\n{\"b\":");
        assert_eq!(drain_lines(&mut buf), vec!["{\"a\":1}"]);
        assert_eq!(buf, "{\"b\":");
    }

    #[test]
    fn drain_skips_blank_lines() {
        let mut buf = String::from("\n\n{\"a\":1}\n\n");
        assert_eq!(drain_lines(&mut buf), vec!["{\"a\":1}"]);
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("{\"type\":");
        assert!(drain_lines(&mut buf).is_empty());
        buf.push_str("\"pong\"}\n");
        assert_eq!(drain_lines(&mut buf), vec!["{\"type\":\"pong\"}"]);
    }

    #[test]
    fn parse_stream_token() {
        let ev = parse_event(r#"{"type":"stream_token","chunk":"Hi"}"#).unwrap();
        assert!(matches!(ev, AgentEvent::StreamToken { chunk, .. } if chunk == "Hi"));
    }

    #[test]
    fn parse_malformed_line_is_err() {
        assert!(parse_event("{oops").is_err());
        assert!(parse_event(r#"{"type":"unknown_thing"}"#).is_err());
    }
}
