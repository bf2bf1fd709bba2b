//! Plain HTTP channel: one POST per request, response in the body.
//!
//! Some servers assign a session on `initialize` and expect it echoed on
//! every later request. The session id is taken from the initialize
//! response body (`sessionId` / `session_id` / `id`) or from a
//! well-known response header, and sent back as `Mcp-Session-Id`.
//!
//! There is no listen stream on this transport; notifications are not
//! delivered.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::channel::{McpChannel, SendOutcome};
use crate::error::{McpError, Result};
use crate::types::{IncomingMessage, JsonRpcRequest, JsonRpcResponse};

/// Headers a server may use to hand out its session id.
const SESSION_HEADERS: [&str; 3] = ["mcp-session-id", "x-session-id", "session-id"];

/// Channel to a remote tool server over request/response HTTP.
pub struct HttpChannel {
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl HttpChannel {
    /// Create a channel for an HTTP endpoint. Headers are already
    /// template-resolved.
    pub fn new(url: String, headers: Vec<(String, String)>) -> Self {
        Self {
            url,
            headers,
            client: reqwest::Client::new(),
            session_id: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Create a channel with an explicit base URL for tests.
    pub fn with_client(url: String, headers: Vec<(String, String)>, client: reqwest::Client) -> Self {
        Self {
            url,
            headers,
            client,
            session_id: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn header_map(&self, method: &str) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::Connection(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::Connection(format!("invalid header value: {e}")))?;
            map.insert(name, value);
        }

        // Echo the negotiated session on everything after initialize.
        if method != "initialize"
            && let Some(session) = self.session_id.lock().expect("session lock poisoned").clone()
            && let Ok(value) = HeaderValue::from_str(&session)
        {
            map.insert(HeaderName::from_static("mcp-session-id"), value);
        }
        Ok(map)
    }

    fn remember_session(&self, response: &JsonRpcResponse, headers: &HeaderMap) {
        let mut session = None;

        if let Some(result) = &response.result {
            for key in ["sessionId", "session_id", "id"] {
                if let Some(value) = result.get(key).and_then(serde_json::Value::as_str) {
                    session = Some(value.to_string());
                    break;
                }
            }
        }
        for name in SESSION_HEADERS {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                session = Some(value.to_string());
            }
        }

        match session {
            Some(id) => {
                debug!(session_id = %id, "captured tool-server session");
                *self.session_id.lock().expect("session lock poisoned") = Some(id);
            }
            None => {
                warn!("no session id in initialize response");
            }
        }
    }
}

#[async_trait::async_trait]
impl McpChannel for HttpChannel {
    async fn connect(&self) -> Result<()> {
        // Request/response transport: nothing to open ahead of time.
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.url, "http channel ready");
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<SendOutcome> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(McpError::Connection("channel not connected".into()));
        }

        let method = request.method.clone();
        debug!(method = %method, url = %self.url, "sending http request");

        let response = self
            .client
            .post(&self.url)
            .headers(self.header_map(&method)?)
            .json(&request)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("http request failed: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| McpError::Transport(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(McpError::Transport(format!("http {status}: {body}")));
        }

        let parsed: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| McpError::Transport(format!("failed to parse response: {e}")))?;

        if method == "initialize" {
            self.remember_session(&parsed, &headers);
        }

        Ok(SendOutcome::Immediate(parsed))
    }

    async fn next_message(&self) -> Option<IncomingMessage> {
        // No long-lived stream on this transport.
        None
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.session_id.lock().expect("session lock poisoned") = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn listen_stream_is_empty() {
        let channel = HttpChannel::new("https://example.com/mcp".into(), vec![]);
        channel.connect().await.unwrap();
        assert!(channel.next_message().await.is_none());
    }

    #[tokio::test]
    async fn send_before_connect_errors() {
        let channel = HttpChannel::new("https://example.com/mcp".into(), vec![]);
        let err = channel
            .send(JsonRpcRequest::new("ping", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
    }

    #[tokio::test]
    async fn roundtrip_with_session_echo() {
        let mut server = mockito::Server::new_async().await;

        let init = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header("mcp-session-id", "sess-77")
            .with_body(
                json!({"jsonrpc": "2.0", "id": "i1", "result": {"capabilities": {}}}).to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let call = server
            .mock("POST", "/mcp")
            .match_header("mcp-session-id", "sess-77")
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": "c1", "result": "done"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let channel = HttpChannel::new(format!("{}/mcp", server.url()), vec![]);
        channel.connect().await.unwrap();

        let outcome = channel
            .send(JsonRpcRequest::new("initialize", json!({})))
            .await
            .unwrap();
        match outcome {
            SendOutcome::Immediate(response) => assert!(response.result.is_some()),
            other => panic!("expected Immediate, got {other:?}"),
        }

        let outcome = channel
            .send(JsonRpcRequest::new("tools/call", json!({"name": "x"})))
            .await
            .unwrap();
        match outcome {
            SendOutcome::Immediate(response) => {
                assert_eq!(response.into_result().unwrap(), "done")
            }
            other => panic!("expected Immediate, got {other:?}"),
        }

        init.assert_async().await;
        call.assert_async().await;
    }

    #[tokio::test]
    async fn session_id_from_body_is_used() {
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_body(
                json!({"jsonrpc": "2.0", "id": "i1", "result": {"sessionId": "body-sess"}})
                    .to_string(),
            )
            .create_async()
            .await;

        let channel = HttpChannel::new(format!("{}/mcp", server.url()), vec![]);
        channel.connect().await.unwrap();
        channel
            .send(JsonRpcRequest::new("initialize", json!({})))
            .await
            .unwrap();

        assert_eq!(
            channel.session_id.lock().unwrap().as_deref(),
            Some("body-sess")
        );
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/mcp")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let channel = HttpChannel::new(format!("{}/mcp", server.url()), vec![]);
        channel.connect().await.unwrap();
        let err = channel
            .send(JsonRpcRequest::new("ping", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn close_clears_session_and_is_idempotent() {
        let channel = HttpChannel::new("https://example.com/mcp".into(), vec![]);
        channel.connect().await.unwrap();
        *channel.session_id.lock().unwrap() = Some("s".into());

        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(channel.session_id.lock().unwrap().is_none());
    }
}
