//! HTTP Server-Sent-Events client binding.
//!
//! The gateway streams events as `field: value` lines, one event per block,
//! blocks separated by a blank line:
//!
//! ```text
//! event: message
//! data: {"post_type":"meta_event", ...}
//!
//! ```
//!
//! [`SseParser`] turns raw body chunks into [`SseEvent`]s and is independent
//! of the network, so chunk boundaries may fall anywhere (even inside a
//! UTF-8 sequence).

use std::collections::VecDeque;

use futures::stream::{BoxStream, Stream};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use onecat_core::{SseClientConfig, TransportError, TransportResult};

/// Event type used when a block has no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One decoded Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, `"message"` when absent.
    pub event: String,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental Server-Sent-Events parser.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of the body and returns every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if self.line.last() == Some(&b'\r') {
                    self.line.pop();
                }
                let line = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                if let Some(event) = self.process_line(&line) {
                    events.push(event);
                }
            } else {
                self.line.push(byte);
            }
        }
        events
    }

    /// Processes one complete line without its terminator.
    pub fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let event_type = self.event_type.take();
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseEvent {
                event: event_type.unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
                data,
            });
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry are not forwarded
            _ => {}
        }
        None
    }
}

/// A bound SSE client.
#[derive(Debug, Clone)]
pub struct SseClientBinding {
    config: SseClientConfig,
    client: Client,
}

impl SseClientBinding {
    /// Creates the binding. The stream has no total timeout.
    pub fn new(config: SseClientConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("failed to build SSE client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The binding configuration.
    pub fn config(&self) -> &SseClientConfig {
        &self.config
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The event stream URL.
    pub fn http_url(&self) -> String {
        self.config.http_url()
    }

    /// The companion WebSocket URL, if enabled.
    pub fn ws_url(&self) -> Option<String> {
        self.config.ws_url()
    }

    /// Opens the event stream.
    ///
    /// Fails with [`TransportError::Auth`] on `401` and with
    /// [`TransportError::Connection`] on any other non-200 status.
    pub async fn connect(&self) -> TransportResult<SseEventStream> {
        let url = self.http_url();
        let mut req = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }

        info!(name = %self.config.name, url = %url, "Connecting to SSE stream");

        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::connection(&url, e))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                warn!(name = %self.config.name, "SSE token rejected");
                return Err(TransportError::Auth {
                    reason: format!("SSE endpoint answered 401: {text}"),
                });
            }
            return Err(TransportError::connection(
                &url,
                format!("SSE endpoint answered {}: {}", status.as_u16(), text),
            ));
        }

        info!(name = %self.config.name, "SSE stream connected");

        let body = resp
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|e| e.to_string())
            .boxed();

        Ok(SseEventStream::new(url, body))
    }
}

/// An open SSE session. Dropping it closes the HTTP response.
pub struct SseEventStream {
    url: String,
    body: BoxStream<'static, Result<Vec<u8>, String>>,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

impl SseEventStream {
    /// Wraps a raw body stream.
    pub fn new(url: impl Into<String>, body: BoxStream<'static, Result<Vec<u8>, String>>) -> Self {
        Self {
            url: url.into(),
            body,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Returns the next event, `None` once the stream has ended.
    ///
    /// A body error is returned once and ends the stream.
    pub async fn next_event(&mut self) -> Option<TransportResult<SseEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.parser.feed(&chunk)),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(TransportError::ConnectionClosed {
                        reason: format!("SSE body error: {e}"),
                    }));
                }
                None => {
                    debug!(url = %self.url, "SSE stream ended");
                    self.finished = true;
                }
            }
        }
    }

    /// Converts the session into a [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = TransportResult<SseEvent>> + Send {
        futures::stream::unfold(self, |mut session| async move {
            session.next_event().await.map(|item| (item, session))
        })
    }
}

impl Drop for SseEventStream {
    fn drop(&mut self) {
        debug!(url = %self.url, "SSE session closed");
    }
}

impl std::fmt::Debug for SseEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseEventStream")
            .field("url", &self.url)
            .field("pending", &self.pending.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "{\"a\":1}".into(),
            }]
        );
    }

    #[test]
    fn test_default_type_and_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: line one\ndata: line two\nid: 7\nretry: 3000\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_chunk_boundaries_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: no").is_empty());
        assert!(parser.feed(b"tice\r\nda").is_empty());
        let events = parser.feed(b"ta: x\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "notice".into(),
                data: "x".into(),
            }]
        );
    }

    #[test]
    fn test_blank_line_without_data_emits_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: ping\n\n: comment\n\n").is_empty());
        // the dangling event type does not leak into the next block
        let events = parser.feed(b"data: y\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let text = "data: 你好\n\n".as_bytes();
        let mut parser = SseParser::new();
        assert!(parser.feed(&text[..8]).is_empty());
        let events = parser.feed(&text[8..]);
        assert_eq!(events[0].data, "你好");
    }

    #[tokio::test]
    async fn test_event_stream_over_chunks() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: 1\n\nda".to_vec()),
            Ok(b"ta: 2\n\n".to_vec()),
            Err("reset".into()),
        ];
        let mut stream = SseEventStream::new("test", futures::stream::iter(chunks).boxed());

        assert_eq!(stream.next_event().await.unwrap().unwrap().data, "1");
        assert_eq!(stream.next_event().await.unwrap().unwrap().data, "2");
        assert!(stream.next_event().await.unwrap().is_err());
        assert!(stream.next_event().await.is_none());
    }
}
