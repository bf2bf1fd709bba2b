//! Message envelope for routed and correlated traffic.
//!
//! [`MessageEnvelope`] wraps a payload with delivery metadata: TTL,
//! retry budget, delivery mode, and the point-to-point vs pub/sub
//! pattern. Envelopes are what the dispatcher queues, retries, and
//! dead-letters; the bus-facing API deals in typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery guarantee requested for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Fire and forget.
    AtMostOnce,
    /// Retried until the retry budget is exhausted; duplicates possible.
    AtLeastOnce,
}

/// Routing pattern for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePattern {
    /// Direct component-to-component delivery.
    PointToPoint,
    /// Broadcast to subscribers.
    PublishSubscribe,
}

/// Default retry budget per envelope.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default envelope TTL in seconds.
pub const DEFAULT_TTL_SECONDS: i64 = 300;

/// A message in flight between components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique message identifier.
    pub message_id: String,

    /// Session the message belongs to.
    pub session_id: String,

    /// Event name this message carries.
    pub event_type: String,

    /// The payload, in wire shape.
    pub payload: Value,

    /// Component that sent the message.
    #[serde(default)]
    pub sender: Option<String>,

    /// Component the message is addressed to (point-to-point only).
    #[serde(default)]
    pub target: Option<String>,

    /// Requested delivery guarantee.
    pub delivery_mode: DeliveryMode,

    /// Routing pattern.
    pub pattern: MessagePattern,

    /// When the envelope was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Delivery attempts made so far.
    #[serde(default)]
    pub retry_count: u32,

    /// Maximum delivery attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds after `created_at` at which the envelope expires.
    /// `None` means the envelope never expires.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: Option<i64>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_ttl() -> Option<i64> {
    Some(DEFAULT_TTL_SECONDS)
}

impl MessageEnvelope {
    /// Create a point-to-point envelope addressed to `target`.
    pub fn component_message(
        session_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        target: impl Into<String>,
        sender: Option<String>,
    ) -> Self {
        Self {
            message_id: format!("msg-{}", short_id()),
            session_id: session_id.into(),
            event_type: event_type.into(),
            payload,
            sender,
            target: Some(target.into()),
            delivery_mode: DeliveryMode::AtLeastOnce,
            pattern: MessagePattern::PointToPoint,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            ttl_seconds: Some(DEFAULT_TTL_SECONDS),
        }
    }

    /// Create a pub/sub envelope with no fixed target.
    pub fn broadcast_message(
        session_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        sender: Option<String>,
    ) -> Self {
        Self {
            message_id: format!("evt-{}", short_id()),
            session_id: session_id.into(),
            event_type: event_type.into(),
            payload,
            sender,
            target: None,
            delivery_mode: DeliveryMode::AtMostOnce,
            pattern: MessagePattern::PublishSubscribe,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            ttl_seconds: Some(DEFAULT_TTL_SECONDS),
        }
    }

    /// Whether the TTL window has elapsed.
    pub fn is_expired(&self) -> bool {
        match self.ttl_seconds {
            Some(ttl) => (Utc::now() - self.created_at).num_seconds() > ttl,
            None => false,
        }
    }

    /// Whether another delivery attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries && !self.is_expired()
    }
}

fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn component_message_defaults() {
        let env = MessageEnvelope::component_message(
            "s1",
            "input.received",
            json!({"input": "x"}),
            "agent",
            Some("inp".into()),
        );
        assert!(env.message_id.starts_with("msg-"));
        assert_eq!(env.target.as_deref(), Some("agent"));
        assert_eq!(env.pattern, MessagePattern::PointToPoint);
        assert_eq!(env.delivery_mode, DeliveryMode::AtLeastOnce);
        assert_eq!(env.retry_count, 0);
        assert!(env.can_retry());
        assert!(!env.is_expired());
    }

    #[test]
    fn broadcast_message_has_no_target() {
        let env = MessageEnvelope::broadcast_message("s1", "agent.thought", json!({}), None);
        assert!(env.target.is_none());
        assert_eq!(env.pattern, MessagePattern::PublishSubscribe);
        assert_eq!(env.delivery_mode, DeliveryMode::AtMostOnce);
    }

    #[test]
    fn expiry_by_ttl() {
        let mut env = MessageEnvelope::component_message("s", "e", json!({}), "t", None);
        env.created_at = Utc::now() - Duration::seconds(301);
        assert!(env.is_expired());
        assert!(!env.can_retry());
    }

    #[test]
    fn no_ttl_never_expires() {
        let mut env = MessageEnvelope::component_message("s", "e", json!({}), "t", None);
        env.ttl_seconds = None;
        env.created_at = Utc::now() - Duration::days(30);
        assert!(!env.is_expired());
    }

    #[test]
    fn retry_budget_exhaustion() {
        let mut env = MessageEnvelope::component_message("s", "e", json!({}), "t", None);
        env.retry_count = env.max_retries;
        assert!(!env.can_retry());
    }

    #[test]
    fn serde_roundtrip() {
        let env = MessageEnvelope::component_message(
            "session-9",
            "tool.call",
            json!({"tool": "search", "args": {}}),
            "search_tool",
            Some("agent".into()),
        );
        let text = serde_json::to_string(&env).unwrap();
        let restored: MessageEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(restored.message_id, env.message_id);
        assert_eq!(restored.event_type, "tool.call");
        assert_eq!(restored.sender.as_deref(), Some("agent"));
        assert_eq!(restored.ttl_seconds, Some(DEFAULT_TTL_SECONDS));
    }

    #[test]
    fn delivery_mode_wire_names() {
        let text = serde_json::to_string(&DeliveryMode::AtLeastOnce).unwrap();
        assert_eq!(text, "\"at_least_once\"");
        let text = serde_json::to_string(&MessagePattern::PublishSubscribe).unwrap();
        assert_eq!(text, "\"publish_subscribe\"");
    }
}
