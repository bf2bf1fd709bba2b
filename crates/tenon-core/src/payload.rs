//! Event-name -> payload schema registry.
//!
//! Seeded with the known events; unknown events coerce to the generic
//! payload rather than failing. Coercion never raises: malformed input
//! falls back to a generic payload wrapping the raw data, with a warning
//! logged. Plugins extend the table via [`PayloadRegistry::register`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use tenon_types::payload::{
    AgentAction, AgentError, AgentStepComplete, AgentThought, GenericPayload, InputReceived,
    Payload, ToolCall, ToolObservation, UserInputRequest, UserInputResponse, events,
};

/// Constructor for a custom payload type: raw JSON in, payload out.
/// Returning `None` signals a coercion failure (the registry falls back
/// to the generic payload).
pub type PayloadCtor = Arc<dyn Fn(Value) -> Option<Payload> + Send + Sync>;

/// Raw material accepted by [`PayloadRegistry::create`].
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// Already typed; returned as-is.
    Typed(Payload),
    /// A JSON value (usually an object).
    Value(Value),
    /// A JSON document to parse first.
    Text(String),
}

impl From<Payload> for RawPayload {
    fn from(p: Payload) -> Self {
        RawPayload::Typed(p)
    }
}

impl From<Value> for RawPayload {
    fn from(v: Value) -> Self {
        RawPayload::Value(v)
    }
}

impl From<&str> for RawPayload {
    fn from(s: &str) -> Self {
        RawPayload::Text(s.to_string())
    }
}

/// Field names per known schema, used to report dropped fields at debug
/// level when coercing a map into a known payload type.
fn schema_fields(event: &str) -> Option<&'static [&'static str]> {
    match event {
        events::INPUT_RECEIVED => Some(&[
            "input",
            "inputs",
            "session_id",
            "timestamp",
            "component_id",
            "component_type",
        ]),
        events::AGENT_THOUGHT => Some(&["thought", "timestamp", "component_id", "component_type"]),
        events::AGENT_ACTION => Some(&["action", "timestamp", "component_id", "component_type"]),
        events::TOOL_CALL => Some(&[
            "tool",
            "args",
            "timestamp",
            "component_id",
            "component_type",
        ]),
        events::TOOL_OBSERVATION => Some(&[
            "tool",
            "observation",
            "timestamp",
            "component_id",
            "component_type",
        ]),
        events::AGENT_STEP_COMPLETE => Some(&[
            "step",
            "session_id",
            "timestamp",
            "component_id",
            "component_type",
        ]),
        events::AGENT_ERROR => Some(&[
            "error",
            "error_type",
            "context",
            "timestamp",
            "component_id",
            "component_type",
        ]),
        events::USER_INPUT_REQUEST => Some(&[
            "question",
            "request_id",
            "timeout_seconds",
            "timestamp",
            "component_id",
            "component_type",
        ]),
        events::USER_INPUT_RESPONSE => Some(&[
            "request_id",
            "response",
            "timestamp",
            "component_id",
            "component_type",
        ]),
        _ => None,
    }
}

/// Registry mapping event names to payload schemas.
pub struct PayloadRegistry {
    custom: RwLock<HashMap<String, PayloadCtor>>,
}

impl PayloadRegistry {
    /// Create a registry seeded with the built-in event schemas.
    pub fn new() -> Self {
        Self {
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Register a custom payload constructor for an event.
    ///
    /// Custom constructors take precedence over the built-in table,
    /// letting plugins override or extend known events.
    pub fn register(&self, event: impl Into<String>, ctor: PayloadCtor) {
        let event = event.into();
        debug!(event = %event, "registered custom payload type");
        self.custom
            .write()
            .expect("payload registry lock poisoned")
            .insert(event, ctor);
    }

    /// Build a typed payload for `event` from raw input.
    ///
    /// Never fails: coercion errors produce a generic payload wrapping
    /// the raw data and log a warning.
    pub fn create(&self, event: &str, raw: impl Into<RawPayload>) -> Payload {
        let value = match raw.into() {
            RawPayload::Typed(payload) => return payload,
            RawPayload::Value(value) => value,
            RawPayload::Text(text) => match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    warn!(event = %event, error = %e, "payload JSON did not parse, using generic fallback");
                    return Payload::Generic(GenericPayload::from_value(Value::String(text)));
                }
            },
        };

        // Custom constructors win over the built-in table.
        let custom = {
            let map = self.custom.read().expect("payload registry lock poisoned");
            map.get(event).cloned()
        };
        if let Some(ctor) = custom {
            if let Some(payload) = ctor(value.clone()) {
                return payload;
            }
            warn!(event = %event, "custom payload constructor rejected data, using generic fallback");
            return Payload::Generic(GenericPayload::from_value(value));
        }

        self.log_dropped_fields(event, &value);

        let coerced: Option<Payload> = match event {
            events::INPUT_RECEIVED => from_value::<InputReceived>(value.clone())
                .map(Payload::InputReceived),
            events::AGENT_THOUGHT => from_value::<AgentThought>(value.clone())
                .map(Payload::AgentThought),
            events::AGENT_ACTION => from_value::<AgentAction>(value.clone())
                .map(Payload::AgentAction),
            events::TOOL_CALL => from_value::<ToolCall>(value.clone()).map(Payload::ToolCall),
            events::TOOL_OBSERVATION => from_value::<ToolObservation>(value.clone())
                .map(Payload::ToolObservation),
            events::AGENT_STEP_COMPLETE => from_value::<AgentStepComplete>(value.clone())
                .map(Payload::AgentStepComplete),
            events::AGENT_ERROR => from_value::<AgentError>(value.clone())
                .map(Payload::AgentError),
            events::USER_INPUT_REQUEST => from_value::<UserInputRequest>(value.clone())
                .map(Payload::UserInputRequest),
            events::USER_INPUT_RESPONSE => from_value::<UserInputResponse>(value.clone())
                .map(Payload::UserInputResponse),
            _ => return Payload::Generic(GenericPayload::from_value(value)),
        };

        match coerced {
            Some(payload) => {
                let validation_errors = payload.validate();
                if !validation_errors.is_empty() {
                    warn!(
                        event = %event,
                        errors = ?validation_errors,
                        "payload failed validation (delivered anyway)"
                    );
                }
                payload
            }
            None => {
                warn!(event = %event, "payload did not match schema, using generic fallback");
                Payload::Generic(GenericPayload::from_value(value))
            }
        }
    }

    /// Validate raw data against the event's schema without keeping the
    /// constructed payload.
    pub fn validate(&self, event: &str, raw: impl Into<RawPayload>) -> Vec<String> {
        self.create(event, raw).validate()
    }

    /// Field names and required flags for an event's schema, for tooling.
    /// Unknown events report the generic schema.
    pub fn schema_of(&self, event: &str) -> Vec<(&'static str, bool)> {
        match schema_fields(event) {
            Some(fields) => fields
                .iter()
                .map(|&f| {
                    let required = matches!(
                        f,
                        "input" | "thought" | "action" | "tool" | "error" | "question" | "request_id"
                    );
                    (f, required)
                })
                .collect(),
            None => vec![
                ("data", false),
                ("timestamp", false),
                ("component_id", false),
                ("component_type", false),
            ],
        }
    }

    fn log_dropped_fields(&self, event: &str, value: &Value) {
        if let (Some(fields), Value::Object(map)) = (schema_fields(event), value) {
            let dropped: Vec<&String> =
                map.keys().filter(|k| !fields.contains(&k.as_str())).collect();
            if !dropped.is_empty() {
                debug!(event = %event, fields = ?dropped, "dropping fields not in schema");
            }
        }
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_event_coerces_to_typed_payload() {
        let registry = PayloadRegistry::new();
        let payload = registry.create("input.received", json!({"input": "hello"}));
        match payload {
            Payload::InputReceived(p) => assert_eq!(p.input, "hello"),
            other => panic!("expected InputReceived, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_yields_generic() {
        let registry = PayloadRegistry::new();
        let payload = registry.create("custom.event", json!({"anything": 1}));
        match payload {
            Payload::Generic(p) => assert_eq!(p.data["anything"], 1),
            other => panic!("expected Generic, got {other:?}"),
        }
    }

    #[test]
    fn typed_input_passes_through() {
        let registry = PayloadRegistry::new();
        let original = registry.create("agent.thought", json!({"thought": "hm"}));
        let again = registry.create("agent.thought", original.clone());
        assert_eq!(again, original);
    }

    #[test]
    fn json_string_input_parses() {
        let registry = PayloadRegistry::new();
        let payload = registry.create("tool.call", r#"{"tool": "search", "args": {"q": "x"}}"#);
        match payload {
            Payload::ToolCall(p) => {
                assert_eq!(p.tool, "search");
                assert_eq!(p.args["q"], "x");
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_falls_back_without_panicking() {
        let registry = PayloadRegistry::new();
        let payload = registry.create("input.received", "not json at all");
        assert!(matches!(payload, Payload::Generic(_)));
    }

    #[test]
    fn schema_mismatch_falls_back_to_generic() {
        let registry = PayloadRegistry::new();
        // `input` must be a string; a number cannot coerce.
        let payload = registry.create("input.received", json!({"input": 42}));
        match payload {
            Payload::Generic(p) => assert_eq!(p.data["input"], 42),
            other => panic!("expected Generic, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_dropped_for_known_schema() {
        let registry = PayloadRegistry::new();
        let payload = registry.create(
            "agent.thought",
            json!({"thought": "x", "extra_field": true}),
        );
        let value = payload.to_value();
        assert!(value.get("extra_field").is_none());
    }

    #[test]
    fn custom_ctor_takes_precedence() {
        let registry = PayloadRegistry::new();
        registry.register(
            "plugin.event",
            Arc::new(|value| {
                let mut generic = GenericPayload::from_value(value);
                generic.component_type = Some("plugin".into());
                Some(Payload::Generic(generic))
            }),
        );
        let payload = registry.create("plugin.event", json!({"x": 1}));
        match payload {
            Payload::Generic(p) => assert_eq!(p.component_type.as_deref(), Some("plugin")),
            other => panic!("expected Generic, got {other:?}"),
        }
    }

    #[test]
    fn custom_ctor_rejection_falls_back() {
        let registry = PayloadRegistry::new();
        registry.register("picky.event", Arc::new(|_| None));
        let payload = registry.create("picky.event", json!({"y": 2}));
        match payload {
            Payload::Generic(p) => assert_eq!(p.data["y"], 2),
            other => panic!("expected Generic, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_via_registry_is_field_equal() {
        let registry = PayloadRegistry::new();
        let original = registry.create(
            "tool.observation",
            json!({"tool": "calc", "observation": "42"}),
        );
        let wire = serde_json::to_value(&original).unwrap();
        let restored = registry.create("tool.observation", wire);
        assert_eq!(restored, original);
    }

    #[test]
    fn validate_reports_schema_errors() {
        let registry = PayloadRegistry::new();
        let errors = registry.validate("agent.thought", json!({"thought": ""}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("thought"));
    }

    #[test]
    fn schema_of_marks_required_fields() {
        let registry = PayloadRegistry::new();
        let schema = registry.schema_of("tool.call");
        assert!(schema.contains(&("tool", true)));
        assert!(schema.contains(&("args", false)));

        let generic = registry.schema_of("whatever.event");
        assert!(generic.contains(&("data", false)));
    }
}
