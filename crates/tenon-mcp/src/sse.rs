//! Server-sent-events channel.
//!
//! Server-to-client frames arrive on a long-lived `text/event-stream`
//! GET; client-to-server requests POST to the `/send` companion
//! endpoint. `data:` lines are buffered until the blank-line event
//! terminator, then parsed as JSON-RPC frames.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{McpChannel, SendOutcome};
use crate::error::{McpError, Result};
use crate::types::{IncomingMessage, JsonRpcRequest};

type ChunkStream = BoxStream<'static, std::result::Result<String, reqwest::Error>>;

struct EventStream {
    chunks: ChunkStream,
    buffer: String,
}

/// Channel to a remote tool server over server-sent events.
pub struct SseChannel {
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
    stream: Mutex<Option<EventStream>>,
}

impl SseChannel {
    /// Create a channel for an SSE endpoint. Headers are already
    /// template-resolved.
    pub fn new(url: String, headers: Vec<(String, String)>) -> Self {
        Self {
            url,
            headers,
            client: reqwest::Client::new(),
            stream: Mutex::new(None),
        }
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::Connection(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::Connection(format!("invalid header value: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// The POST endpoint paired with the event stream.
    fn send_url(&self) -> String {
        format!("{}/send", self.url.trim_end_matches('/'))
    }

    /// Pull the next complete SSE event's `data:` payload out of the
    /// buffered stream.
    async fn next_event_data(&self) -> Option<String> {
        loop {
            let mut guard = self.stream.lock().await;
            let stream = guard.as_mut()?;

            // A blank line terminates an event.
            if let Some(boundary) = stream.buffer.find("\n\n") {
                let event: String = stream.buffer.drain(..boundary + 2).collect();
                let data: Vec<&str> = event
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    // Comment or keep-alive event.
                    continue;
                }
                return Some(data.join("\n"));
            }

            match stream.chunks.next().await {
                Some(Ok(chunk)) => {
                    stream.buffer.push_str(&chunk);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "sse stream error");
                    *guard = None;
                    return None;
                }
                None => {
                    debug!("sse stream ended");
                    *guard = None;
                    return None;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl McpChannel for SseChannel {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!(url = %self.url, "opening sse stream");

        let response = self
            .client
            .get(&self.url)
            .headers(self.header_map()?)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("failed to connect: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Connection(format!(
                "sse endpoint returned {status}"
            )));
        }

        let chunks: ChunkStream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .boxed();

        *guard = Some(EventStream {
            chunks,
            buffer: String::new(),
        });
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<SendOutcome> {
        if self.stream.lock().await.is_none() {
            return Err(McpError::Connection("channel not connected".into()));
        }

        let response = self
            .client
            .post(self.send_url())
            .headers(self.header_map()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("failed to send: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Transport(format!(
                "send endpoint returned {status}"
            )));
        }

        // The companion endpoint may assign its own request id.
        let request_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("request_id")
                    .and_then(serde_json::Value::as_str)
                    .map(String::from)
            })
            .unwrap_or_else(|| request.id.clone());

        debug!(method = %request.method, id = %request_id, "sent sse request");
        Ok(SendOutcome::Correlated(request_id))
    }

    async fn next_message(&self) -> Option<IncomingMessage> {
        loop {
            let data = self.next_event_data().await?;
            match IncomingMessage::parse(&data) {
                Ok(message) => return Some(message),
                Err(e) => {
                    warn!(error = %e, "skipping malformed sse frame");
                    continue;
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.take().is_some() {
            info!(url = %self.url, "sse channel closed");
        }
        Ok(())
    }
}
