//! Request/response correlation.
//!
//! A component calls `request(target, data, timeout)` on its handle; the
//! correlator generates a request id, stamps the correlation metadata
//! onto the envelope payload, and parks a oneshot until the reply
//! envelope resolves it. Timeouts always resolve the pending entry, so
//! the map is leak-free by construction. Late replies are dropped with a
//! warning.
//!
//! Sugar on top of the same machinery: a fluent [`RequestBuilder`],
//! concurrent `request_multiple`, a (degenerate single-chunk)
//! `request_stream`, and `ask_user` for user-in-the-loop questions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use tenon_types::envelope::MessageEnvelope;
use tenon_types::payload::{Payload, UserInputRequest, events};
use tenon_types::{Result, TenonError};

use crate::delivery::{COMPONENT_MESSAGE, REQUEST_ID, RESPONSE_REQUIRED, RESPONSE_TARGET, dispatch};
use crate::runtime::{ComponentHandle, Handle};

/// Default timeout for `request`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One chunk of a streamed response.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Chunk content.
    pub data: String,
    /// Whether this is the last chunk.
    pub is_final: bool,
    /// Zero-based chunk position.
    pub chunk_index: u64,
    /// Free-form metadata; `error: true` marks a failure chunk.
    pub metadata: Map<String, Value>,
}

/// Tracks pending requests and user-input waits.
pub struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>,
    user_waits: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            user_waits: Mutex::new(HashMap::new()),
        }
    }

    /// Number of requests currently awaiting replies.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }

    pub(crate) fn register(&self, request_id: &str) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve a pending request. Replies with no live pending entry are
    /// dropped with a warning (late reply after timeout, or duplicate).
    pub(crate) fn complete(&self, request_id: &str, outcome: Result<Value>) {
        let sender = self
            .pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(request_id);
        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(request_id = %request_id, "reply receiver already gone");
                }
            }
            None => {
                warn!(request_id = %request_id, "dropping reply with no pending request");
            }
        }
    }

    pub(crate) fn cancel(&self, request_id: &str) {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(request_id);
    }

    pub(crate) fn register_user_wait(&self, request_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.user_waits
            .lock()
            .expect("correlator lock poisoned")
            .insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve a user-input wait. Returns whether a waiter existed.
    pub(crate) fn complete_user(&self, request_id: &str, response: String) -> bool {
        let sender = self
            .user_waits
            .lock()
            .expect("correlator lock poisoned")
            .remove(request_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                warn!(request_id = %request_id, "user response with no pending question");
                false
            }
        }
    }

    pub(crate) fn cancel_user_wait(&self, request_id: &str) {
        self.user_waits
            .lock()
            .expect("correlator lock poisoned")
            .remove(request_id);
    }

    /// Fail every pending entry with [`TenonError::Shutdown`].
    pub(crate) fn fail_all(&self) {
        let pending: Vec<(String, oneshot::Sender<Result<Value>>)> = {
            let mut map = self.pending.lock().expect("correlator lock poisoned");
            map.drain().collect()
        };
        for (request_id, tx) in pending {
            debug!(request_id = %request_id, "cancelling pending request on shutdown");
            let _ = tx.send(Err(TenonError::Shutdown));
        }
        self.user_waits
            .lock()
            .expect("correlator lock poisoned")
            .clear();
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue a correlated request from `source` to `target`.
pub(crate) async fn request(
    handle: &Handle,
    source: &str,
    target: &str,
    data: Value,
    timeout: Duration,
) -> Result<Value> {
    let request_id = format!(
        "{source}_{target}_{}",
        &Uuid::new_v4().simple().to_string()[..12]
    );
    debug!(source = %source, target = %target, request_id = %request_id, "sending request");

    let rx = handle.correlator().register(&request_id);

    let mut payload = Map::new();
    payload.insert("data".into(), data);
    payload.insert(
        "source_component".into(),
        Value::String(source.to_string()),
    );
    payload.insert(RESPONSE_REQUIRED.into(), Value::Bool(true));
    payload.insert(REQUEST_ID.into(), Value::String(request_id.clone()));
    payload.insert(RESPONSE_TARGET.into(), Value::String(source.to_string()));

    let envelope = MessageEnvelope::component_message(
        handle.session_id().to_string(),
        COMPONENT_MESSAGE,
        Value::Object(payload),
        target,
        Some(source.to_string()),
    );

    if let Err(e) = dispatch(handle.clone(), envelope).await {
        handle.correlator().cancel(&request_id);
        return Err(e);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_closed)) => Err(TenonError::Shutdown),
        Err(_elapsed) => {
            handle.correlator().cancel(&request_id);
            Err(TenonError::Timeout {
                operation: format!(
                    "request to '{target}' did not complete within {}ms",
                    timeout.as_millis()
                ),
            })
        }
    }
}

/// Issue several requests concurrently; results keep input order.
pub(crate) async fn request_multiple(
    handle: &Handle,
    source: &str,
    requests: Vec<(String, Value)>,
    timeout: Duration,
) -> Vec<Result<Value>> {
    let futures = requests
        .into_iter()
        .map(|(target, data)| {
            let handle = handle.clone();
            let source = source.to_string();
            async move { request(&handle, &source, &target, data, timeout).await }
        })
        .collect::<Vec<_>>();
    futures_util::future::join_all(futures).await
}

/// Issue a request and present the reply as a chunk stream.
///
/// The current contract is degenerate single-chunk streaming: one final
/// chunk wrapping the normal reply, or one final error chunk with
/// `metadata.error = true`.
pub(crate) async fn request_stream(
    handle: &Handle,
    source: &str,
    target: &str,
    data: Value,
    timeout: Duration,
) -> futures_util::stream::Iter<std::vec::IntoIter<StreamChunk>> {
    let chunk = match request(handle, source, target, data, timeout).await {
        Ok(value) => StreamChunk {
            data: match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            },
            is_final: true,
            chunk_index: 0,
            metadata: Map::new(),
        },
        Err(e) => {
            let mut metadata = Map::new();
            metadata.insert("error".into(), Value::Bool(true));
            metadata.insert("error_type".into(), json!(crate::delivery::error_type_of(&e)));
            StreamChunk {
                data: e.to_string(),
                is_final: true,
                chunk_index: 0,
                metadata,
            }
        }
    };
    futures_util::stream::iter(vec![chunk])
}

/// Ask the user a question and await the matching response event.
///
/// Emits `user.input.request`, parks a wait keyed by the request id, and
/// resolves it when a `user.input.response` with the same id arrives.
/// A timeout yields a human-readable sentinel rather than an error.
pub(crate) async fn ask_user(
    handle: &Handle,
    source: &str,
    question: &str,
    timeout: Duration,
) -> String {
    let request_id = format!("ask-{}", &Uuid::new_v4().simple().to_string()[..12]);
    let rx = handle.correlator().register_user_wait(&request_id);

    let payload = Payload::UserInputRequest(UserInputRequest {
        question: question.to_string(),
        request_id: request_id.clone(),
        timeout_seconds: timeout.as_secs_f64(),
        timestamp: chrono::Utc::now(),
        component_id: Some(source.to_string()),
        component_type: None,
    });
    handle
        .emit_from_component(source, events::USER_INPUT_REQUEST, payload)
        .await;

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) | Err(_) => {
            handle.correlator().cancel_user_wait(&request_id);
            format!(
                "No response received within {} seconds",
                timeout.as_secs_f64()
            )
        }
    }
}

/// A target and timeout pinned for several requests.
///
/// The scoped equivalent of repeating `request_with_timeout` with the
/// same arguments:
///
/// ```rust,ignore
/// let scope = handle.request_scope("vector_db", Duration::from_secs(2));
/// let a = scope.send(json!({"query": "first"})).await?;
/// let b = scope.send(json!({"query": "second"})).await?;
/// ```
pub struct RequestScope {
    handle: ComponentHandle,
    target: String,
    timeout: Duration,
}

impl RequestScope {
    pub(crate) fn new(handle: ComponentHandle, target: String, timeout: Duration) -> Self {
        Self {
            handle,
            target,
            timeout,
        }
    }

    /// The pinned target component.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Send one request within the scope.
    pub async fn send(&self, data: Value) -> Result<Value> {
        self.handle
            .request_with_timeout(&self.target, data, self.timeout)
            .await
    }
}

/// Fluent request construction: `message().to(..).with_data(..).send_and_wait()`.
pub struct RequestBuilder {
    handle: ComponentHandle,
    target: Option<String>,
    data: Value,
    timeout: Duration,
}

impl RequestBuilder {
    pub(crate) fn new(handle: ComponentHandle) -> Self {
        Self {
            handle,
            target: None,
            data: Value::Object(Map::new()),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Address the request.
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach the request data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Override the default 5 s timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send and await the reply.
    ///
    /// A builder without a target is a validation error.
    pub async fn send_and_wait(self) -> Result<Value> {
        let target = self.target.ok_or_else(|| TenonError::ConfigInvalid {
            reason: "request builder requires a target component".into(),
        })?;
        self.handle
            .request_with_timeout(&target, self.data, self.timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_registered_request() {
        let correlator = Correlator::new();
        let rx = correlator.register("r1");
        correlator.complete("r1", Ok(json!({"ok": true})));
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome["ok"], true);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped() {
        let correlator = Correlator::new();
        // No pending entry: must not panic.
        correlator.complete("ghost", Ok(Value::Null));
    }

    #[tokio::test]
    async fn cancel_removes_pending_entry() {
        let correlator = Correlator::new();
        let rx = correlator.register("r2");
        correlator.cancel("r2");
        assert_eq!(correlator.pending_count(), 0);
        // Late reply after cancellation is the dropped-with-warning path.
        correlator.complete("r2", Ok(Value::Null));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn fail_all_sends_shutdown() {
        let correlator = Correlator::new();
        let rx1 = correlator.register("a");
        let rx2 = correlator.register("b");
        correlator.fail_all();

        for rx in [rx1, rx2] {
            let outcome = rx.await.unwrap();
            assert!(matches!(outcome, Err(TenonError::Shutdown)));
        }
    }

    #[tokio::test]
    async fn user_wait_roundtrip() {
        let correlator = Correlator::new();
        let rx = correlator.register_user_wait("q1");
        assert!(correlator.complete_user("q1", "yes".into()));
        assert_eq!(rx.await.unwrap(), "yes");
        assert!(!correlator.complete_user("q1", "again".into()));
    }
}
