use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use shared::protocol::{AccountEvent, AccountEventKind};
use tracing::warn;
use url::Url;

use crate::{error::StreamError, session::Credential};

pub type AccountEventStream = Pin<Box<dyn Stream<Item = Result<AccountEvent>> + Send>>;

/// Transport seam for the account-scoped server-push stream. The engine
/// owns open/close ordering and the idempotent-open contract; the transport
/// only moves bytes.
#[async_trait]
pub trait AccountStreamTransport: Send + Sync {
    async fn open(&self, credential: &Credential) -> Result<AccountEventStream>;

    /// Tells the server to stop routing events at this client. Called
    /// before the reader goes away so the server is not left publishing
    /// into a socket nobody reads.
    async fn release(&self, credential: &Credential) -> Result<()>;
}

pub struct MissingAccountStreamTransport;

#[async_trait]
impl AccountStreamTransport for MissingAccountStreamTransport {
    async fn open(&self, _credential: &Credential) -> Result<AccountEventStream> {
        Err(StreamError::Unavailable.into())
    }

    async fn release(&self, _credential: &Credential) -> Result<()> {
        Err(StreamError::Unavailable.into())
    }
}

/// Server-sent-events transport over a streaming HTTP response.
pub struct SseTransport {
    http: Client,
    base: Url,
}

impl SseTransport {
    pub fn new(base: Url) -> Self {
        Self {
            http: Client::new(),
            base,
        }
    }

    fn stream_endpoint(&self) -> Result<Url> {
        self.base
            .join("api/v1/users/stream")
            .context("invalid stream endpoint")
    }
}

#[async_trait]
impl AccountStreamTransport for SseTransport {
    async fn open(&self, credential: &Credential) -> Result<AccountEventStream> {
        let mut url = self.stream_endpoint()?;
        url.query_pairs_mut().append_pair("token", &credential.token);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| StreamError::Connect(err.to_string()))?
            .error_for_status()
            .map_err(|err| StreamError::Connect(err.to_string()))?;

        let events = response
            .bytes_stream()
            .scan(SseParser::new(), |parser, chunk| {
                let batch: Vec<Result<AccountEvent>> = match chunk {
                    Ok(bytes) => parser.push(&bytes).into_iter().map(Ok).collect(),
                    Err(err) => vec![Err(
                        anyhow::Error::new(err).context("account stream transport failed")
                    )],
                };
                futures::future::ready(Some(futures::stream::iter(batch)))
            })
            .flatten();
        Ok(Box::pin(events))
    }

    async fn release(&self, credential: &Credential) -> Result<()> {
        let url = self.stream_endpoint()?;
        self.http
            .delete(url)
            .bearer_auth(&credential.token)
            .send()
            .await
            .context("stream release request failed")?
            .error_for_status()
            .context("stream release rejected")?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    message: String,
}

/// Incremental parser for the `event:`/`data:` line protocol. Chunks may
/// split lines anywhere; events are dispatched on the blank separator line.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<AccountEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.handle_line(line.trim_end_matches(['\r', '\n']), &mut events);
        }
        events
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<AccountEvent>) {
        if line.is_empty() {
            if let Some(event) = self.take_event() {
                out.push(event);
            }
            return;
        }
        if line.starts_with(':') {
            // keep-alive comment
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event_name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            // id and retry are reconnection hints we do not act on
            _ => {}
        }
    }

    fn take_event(&mut self) -> Option<AccountEvent> {
        let name = self.event_name.take();
        let data = std::mem::take(&mut self.data_lines).join("\n");
        let kind = AccountEventKind::from_wire(name.as_deref()?)?;
        if data.is_empty() {
            return None;
        }
        match serde_json::from_str::<StreamPayload>(&data) {
            Ok(payload) => Some(AccountEvent {
                kind,
                message: payload.message,
            }),
            Err(err) => {
                warn!("stream: discarding malformed event payload: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;
