//! Point-to-point delivery under the router.
//!
//! The dispatcher hands envelopes to registered components, queues them
//! (bounded) for components that register late, retries failed routed
//! deliveries with exponential backoff, and dead-letters what cannot be
//! delivered: queue overflow, expiry, exhausted retries.
//!
//! Correlated request envelopes (`component_message`) are unwrapped
//! here: the target's result or error is sent back as a
//! `component_response` envelope that resolves the caller's pending
//! request.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use tenon_types::envelope::MessageEnvelope;
use tenon_types::payload::{GenericPayload, events};
use tenon_types::spec::{CONSOLE_OUTPUT, ComponentKind};
use tenon_types::{Payload, Result, TenonError};

use crate::component::{Component, ComponentInput};
use crate::runtime::Handle;

/// Base delay for the first redelivery attempt; doubles per retry.
const RETRY_BASE: Duration = Duration::from_millis(100);

/// Cap on the redelivery backoff.
const RETRY_CAP: Duration = Duration::from_secs(60);

/// Metadata keys attached to correlated request payloads.
pub(crate) const RESPONSE_REQUIRED: &str = "_response_required";
pub(crate) const REQUEST_ID: &str = "_request_id";
pub(crate) const RESPONSE_TARGET: &str = "_response_target";

/// Event type used for correlated component-to-component messages.
pub(crate) const COMPONENT_MESSAGE: &str = "component_message";

/// A message that could not be delivered.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The undeliverable envelope.
    pub envelope: MessageEnvelope,
    /// Why it was dead-lettered (e.g. `"queue full"`).
    pub reason: String,
    /// When it was dead-lettered.
    pub at: DateTime<Utc>,
}

/// Counters exposed by [`Dispatcher::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Envelopes delivered to a component handler.
    pub messages_delivered: u64,
    /// Envelopes queued for late-registering components.
    pub messages_queued: u64,
    /// Redelivery attempts scheduled.
    pub messages_retried: u64,
    /// Envelopes moved to the dead-letter list.
    pub messages_dead_lettered: u64,
}

/// Queues, dead letters, and delivery counters.
pub struct Dispatcher {
    max_queue_len: usize,
    queues: Mutex<HashMap<String, VecDeque<MessageEnvelope>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    delivered: AtomicU64,
    queued: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with the given per-target queue bound.
    pub fn new(max_queue_len: usize) -> Self {
        Self {
            max_queue_len,
            queues: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            messages_delivered: self.delivered.load(Ordering::Relaxed),
            messages_queued: self.queued.load(Ordering::Relaxed),
            messages_retried: self.retried.load(Ordering::Relaxed),
            messages_dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// The dead-letter list, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .expect("dispatcher lock poisoned")
            .clone()
    }

    /// Number of envelopes currently queued for `target`.
    pub fn queued_for(&self, target: &str) -> usize {
        self.queues
            .lock()
            .expect("dispatcher lock poisoned")
            .get(target)
            .map_or(0, VecDeque::len)
    }

    pub(crate) fn dead_letter(&self, envelope: MessageEnvelope, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(
            message_id = %envelope.message_id,
            target = ?envelope.target,
            reason = %reason,
            "message dead-lettered"
        );
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.dead_letters
            .lock()
            .expect("dispatcher lock poisoned")
            .push(DeadLetter {
                envelope,
                reason,
                at: Utc::now(),
            });
    }

    /// Queue an envelope for a target that has not registered yet.
    fn enqueue(&self, envelope: MessageEnvelope) -> Result<()> {
        let target = envelope.target.clone().unwrap_or_default();
        let mut queues = self.queues.lock().expect("dispatcher lock poisoned");
        let queue = queues.entry(target.clone()).or_default();
        if queue.len() >= self.max_queue_len {
            drop(queues);
            self.dead_letter(envelope, "queue full");
            return Err(TenonError::QueueFull { component: target });
        }
        debug!(target = %target, depth = queue.len() + 1, "queued for late registration");
        queue.push_back(envelope);
        self.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drain the queue for a freshly registered component.
    fn drain(&self, target: &str) -> Vec<MessageEnvelope> {
        self.queues
            .lock()
            .expect("dispatcher lock poisoned")
            .remove(target)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Sweep expired envelopes out of the waiting queues.
    pub(crate) fn sweep_expired(&self) {
        let mut expired = Vec::new();
        {
            let mut queues = self.queues.lock().expect("dispatcher lock poisoned");
            for queue in queues.values_mut() {
                let mut keep = VecDeque::with_capacity(queue.len());
                while let Some(envelope) = queue.pop_front() {
                    if envelope.is_expired() {
                        expired.push(envelope);
                    } else {
                        keep.push_back(envelope);
                    }
                }
                *queue = keep;
            }
        }
        for envelope in expired {
            self.dead_letter(envelope, "expired");
        }
    }
}

/// Deliver an envelope to its target, queueing when the target is not
/// yet registered.
///
/// Boxed because delivery can recurse: a delivered input may auto-emit a
/// response event, which routes to further targets.
pub(crate) fn dispatch(handle: Handle, envelope: MessageEnvelope) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let dispatcher = handle.dispatcher();

        if envelope.is_expired() {
            dispatcher.dead_letter(envelope, "expired");
            return Ok(());
        }

        let Some(target) = envelope.target.clone() else {
            dispatcher.dead_letter(envelope, "missing target");
            return Ok(());
        };

        match handle.registry().get(&target) {
            Some(component) => {
                deliver(handle.clone(), component, envelope).await;
                Ok(())
            }
            None => dispatcher.enqueue(envelope),
        }
    })
}

/// Redeliver everything queued for a component that just registered.
pub(crate) fn flush_queued(handle: &Handle, target: &str) {
    let queued = handle.dispatcher().drain(target);
    if queued.is_empty() {
        return;
    }
    debug!(target = %target, count = queued.len(), "delivering queued messages");
    let handle = handle.clone();
    let target = target.to_string();
    tokio::spawn(async move {
        for envelope in queued {
            if envelope.is_expired() {
                handle.dispatcher().dead_letter(envelope, "expired");
                continue;
            }
            if let Err(e) = dispatch(handle.clone(), envelope).await {
                warn!(target = %target, error = %e, "queued delivery failed");
            }
        }
    });
}

async fn deliver(handle: Handle, component: Arc<dyn Component>, envelope: MessageEnvelope) {
    if envelope.event_type == COMPONENT_MESSAGE {
        deliver_request(handle, component, envelope).await;
    } else {
        deliver_routed(handle, component, envelope).await;
    }
}

/// Handle a correlated `component_message` envelope: either a reply
/// heading back to a waiting caller, or a request to process.
async fn deliver_request(handle: Handle, component: Arc<dyn Component>, envelope: MessageEnvelope) {
    let payload = envelope.payload.clone();
    let data = payload.get("data").cloned().unwrap_or(Value::Null);

    // A reply envelope resolves the caller's pending request instead of
    // invoking `input`.
    if data.get("response_type").and_then(Value::as_str) == Some("component_response") {
        let request_id = data
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let source = data
            .get("source_component")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let outcome = if let Some(error) = data.get("error").and_then(Value::as_str) {
            Err(TenonError::Component {
                component: source,
                message: error.to_string(),
                error_type: data
                    .get("error_type")
                    .and_then(Value::as_str)
                    .unwrap_or("ComponentError")
                    .to_string(),
            })
        } else {
            Ok(data.get("result").cloned().unwrap_or(Value::Null))
        };
        handle.correlator().complete(&request_id, outcome);
        handle.dispatcher().delivered.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let response_required = payload
        .get(RESPONSE_REQUIRED)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let request_id = payload
        .get(REQUEST_ID)
        .and_then(Value::as_str)
        .map(String::from);
    let response_target = payload
        .get(RESPONSE_TARGET)
        .and_then(Value::as_str)
        .map(String::from);

    let input = ComponentInput::from_request_data(data);
    let target_name = component.name().to_string();
    debug!(component = %target_name, "delivering correlated request");

    let result = component.input(input).await;
    handle.dispatcher().delivered.fetch_add(1, Ordering::Relaxed);

    if !response_required {
        if let Err(e) = result {
            warn!(component = %target_name, error = %e, "one-way request failed");
        }
        return;
    }

    let (Some(request_id), Some(response_target)) = (request_id, response_target) else {
        warn!(component = %target_name, "response required but correlation metadata missing");
        return;
    };

    let reply_data = match result {
        Ok(value) => json!({
            "response_type": "component_response",
            "request_id": request_id,
            "result": value.unwrap_or(Value::Null),
            "source_component": target_name,
        }),
        Err(e) => json!({
            "response_type": "component_response",
            "request_id": request_id,
            "error": e.to_string(),
            "error_type": error_type_of(&e),
            "source_component": target_name,
        }),
    };

    let reply = MessageEnvelope::component_message(
        envelope.session_id.clone(),
        COMPONENT_MESSAGE,
        json!({ "data": reply_data }),
        response_target,
        Some(target_name),
    );
    if let Err(e) = dispatch(handle, reply).await {
        warn!(error = %e, "failed to route reply envelope");
    }
}

/// Handle a routed event envelope.
///
/// `input.received` is delivered to any target; other events are
/// observations and reach component `input` only on output-kind sinks.
/// Only work-item (`input.received`) deliveries auto-emit a response
/// event -- a sink returning a value from an observation delivery is a
/// terminal consumer, not a new emission.
async fn deliver_routed(handle: Handle, component: Arc<dyn Component>, envelope: MessageEnvelope) {
    let event = envelope.event_type.clone();
    let target_name = component.name().to_string();

    let is_work_item = event == events::INPUT_RECEIVED;
    let is_sink = component.kind() == ComponentKind::Output || target_name == CONSOLE_OUTPUT;
    if !is_work_item && !is_sink {
        debug!(event = %event, component = %target_name, "skipping delivery (not an input event)");
        return;
    }

    let payload = handle.bus().payloads().create(&event, envelope.payload.clone());
    let input = ComponentInput::Event {
        event: event.clone(),
        payload,
    };

    debug!(event = %event, component = %target_name, "delivering routed event");
    match component.input(input).await {
        Ok(result) => {
            handle.dispatcher().delivered.fetch_add(1, Ordering::Relaxed);
            if is_work_item
                && let Some(value) = result
                && !component.emits_responses()
            {
                auto_emit_response(handle, &component, value, &event).await;
            }
        }
        Err(e) => {
            error!(event = %event, component = %target_name, error = %e, "delivery failed");
            retry_or_dead_letter(handle, envelope, e);
        }
    }
}

/// Auto-emit the kind-appropriate response event for a component that
/// returned a value from `input` without emitting anything itself, so
/// downstream routing continues.
async fn auto_emit_response(
    handle: Handle,
    component: &Arc<dyn Component>,
    result: Value,
    original_event: &str,
) {
    let name = component.name().to_string();
    let kind = component.kind();
    let response_event = kind.response_event();

    let response_text = match &result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut data = Map::new();
    data.insert("response".into(), Value::String(response_text));
    data.insert("source_component".into(), Value::String(name.clone()));
    data.insert(
        "original_event".into(),
        Value::String(original_event.to_string()),
    );

    let payload = Payload::Generic(GenericPayload {
        data,
        timestamp: Utc::now(),
        component_id: Some(name.clone()),
        component_type: Some(kind.as_str().to_string()),
    });

    debug!(component = %name, event = %response_event, "auto-emitting response event");
    handle.emit_from_component(&name, response_event, payload).await;
}

fn retry_or_dead_letter(handle: Handle, mut envelope: MessageEnvelope, error: TenonError) {
    if !envelope.can_retry() {
        handle
            .dispatcher()
            .dead_letter(envelope, format!("handler error: {error}"));
        return;
    }

    envelope.retry_count += 1;
    handle.dispatcher().retried.fetch_add(1, Ordering::Relaxed);
    let backoff = RETRY_BASE
        .saturating_mul(1u32 << envelope.retry_count.min(16))
        .min(RETRY_CAP);
    debug!(
        message_id = %envelope.message_id,
        attempt = envelope.retry_count,
        backoff_ms = backoff.as_millis() as u64,
        "scheduling redelivery"
    );

    let shutdown = handle.shutdown_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(backoff) => {
                if let Err(e) = dispatch(handle.clone(), envelope).await {
                    warn!(error = %e, "redelivery failed");
                }
            }
        }
    });
}

pub(crate) fn error_type_of(error: &TenonError) -> &'static str {
    match error {
        TenonError::ConfigInvalid { .. } => "ValidationError",
        TenonError::Timeout { .. } => "ResponseTimeout",
        TenonError::Component { .. } => "ComponentError",
        TenonError::QueueFull { .. } => "QueueFull",
        TenonError::Shutdown => "ShutdownCancelled",
        TenonError::Channel(_) => "ChannelConnectionError",
        TenonError::Protocol(_) => "ProtocolError",
        TenonError::Io(_) => "IoError",
        TenonError::Json(_) => "JsonError",
        _ => "ComponentError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_to(target: &str) -> MessageEnvelope {
        MessageEnvelope::component_message(
            "s",
            events::INPUT_RECEIVED,
            json!({"input": "x"}),
            target,
            None,
        )
    }

    #[test]
    fn enqueue_respects_bound() {
        let dispatcher = Dispatcher::new(2);
        dispatcher.enqueue(envelope_to("t")).unwrap();
        dispatcher.enqueue(envelope_to("t")).unwrap();

        let err = dispatcher.enqueue(envelope_to("t")).unwrap_err();
        assert!(matches!(err, TenonError::QueueFull { .. }));

        assert_eq!(dispatcher.queued_for("t"), 2);
        let letters = dispatcher.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, "queue full");
        assert_eq!(dispatcher.stats().messages_dead_lettered, 1);
    }

    #[test]
    fn drain_empties_queue() {
        let dispatcher = Dispatcher::new(10);
        dispatcher.enqueue(envelope_to("t")).unwrap();
        dispatcher.enqueue(envelope_to("t")).unwrap();

        let drained = dispatcher.drain("t");
        assert_eq!(drained.len(), 2);
        assert_eq!(dispatcher.queued_for("t"), 0);
    }

    #[test]
    fn sweep_moves_expired_to_dead_letters() {
        let dispatcher = Dispatcher::new(10);
        let mut stale = envelope_to("t");
        stale.created_at = Utc::now() - chrono::Duration::seconds(600);
        dispatcher.enqueue(stale).unwrap();
        dispatcher.enqueue(envelope_to("t")).unwrap();

        dispatcher.sweep_expired();

        assert_eq!(dispatcher.queued_for("t"), 1);
        let letters = dispatcher.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, "expired");
    }

    #[test]
    fn error_types_match_taxonomy() {
        assert_eq!(
            error_type_of(&TenonError::Timeout {
                operation: "x".into()
            }),
            "ResponseTimeout"
        );
        assert_eq!(error_type_of(&TenonError::Shutdown), "ShutdownCancelled");
        assert_eq!(
            error_type_of(&TenonError::component("c", "m")),
            "ComponentError"
        );
    }
}
