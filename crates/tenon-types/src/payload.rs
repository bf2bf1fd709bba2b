//! Typed event payloads.
//!
//! Every known event name maps to one concrete payload struct; unknown
//! events fall back to [`GenericPayload`]. The closed [`Payload`] union is
//! what flows through the bus -- known-event handlers pattern-match on it,
//! unknown-event handlers receive the generic variant.
//!
//! All payloads carry component attribution (`component_id`,
//! `component_type`) and a construction timestamp, so events can be
//! namespaced without prefixing the event name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known event names.
pub mod events {
    /// External work arrived at an input component.
    pub const INPUT_RECEIVED: &str = "input.received";
    /// An agent produced an intermediate thought.
    pub const AGENT_THOUGHT: &str = "agent.thought";
    /// An agent chose an action.
    pub const AGENT_ACTION: &str = "agent.action";
    /// A tool is about to be invoked.
    pub const TOOL_CALL: &str = "tool.call";
    /// A tool produced an observation.
    pub const TOOL_OBSERVATION: &str = "tool.observation";
    /// An agent finished one reasoning step.
    pub const AGENT_STEP_COMPLETE: &str = "agent.step_complete";
    /// An agent failed.
    pub const AGENT_ERROR: &str = "agent.error";
    /// A component asks the user a question.
    pub const USER_INPUT_REQUEST: &str = "user.input.request";
    /// The user answered a question.
    pub const USER_INPUT_RESPONSE: &str = "user.input.response";
    /// An agent produced its final response (generic payload).
    pub const AGENT_RESPONSE: &str = "agent.response";
    /// A tool server reported progress (generic payload).
    pub const TOOL_PROGRESS: &str = "tool.progress";
    /// A tool server resource changed (generic payload).
    pub const RESOURCE_CHANGED: &str = "resource.changed";
    /// A non-agent, non-tool component produced a response.
    pub const COMPONENT_RESPONSE: &str = "component.response";
}

/// Payload for `input.received`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReceived {
    /// The raw input text. Must be non-empty.
    pub input: String,
    /// Named auxiliary inputs.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Session the input belongs to.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

/// Payload for `agent.thought`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThought {
    /// The thought text. Must be non-empty.
    pub thought: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

/// Payload for `agent.action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    /// The chosen action. Must be non-empty.
    pub action: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

/// Payload for `tool.call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool being invoked. Must be non-empty.
    pub tool: String,
    /// Tool arguments.
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

/// Payload for `tool.observation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolObservation {
    /// Name of the tool that produced the observation. Must be non-empty.
    pub tool: String,
    /// The observation text.
    #[serde(default)]
    pub observation: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

/// Payload for `agent.step_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStepComplete {
    /// Zero-based step counter. Must be non-negative.
    #[serde(default)]
    pub step: i64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

/// Payload for `agent.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    /// Error text. Must be non-empty.
    pub error: String,
    /// Coarse classification of the error.
    #[serde(default = "default_error_type")]
    pub error_type: String,
    /// Arbitrary failure context.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

fn default_error_type() -> String {
    "Unknown".into()
}

/// Payload for `user.input.request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInputRequest {
    /// The question shown to the user.
    pub question: String,
    /// Correlation id matching the eventual response.
    pub request_id: String,
    /// How long the asker is prepared to wait.
    #[serde(default = "default_ask_timeout")]
    pub timeout_seconds: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

fn default_ask_timeout() -> f64 {
    30.0
}

/// Payload for `user.input.response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInputResponse {
    /// Correlation id of the original request.
    pub request_id: String,
    /// The user's answer.
    #[serde(default)]
    pub response: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

/// Catch-all payload for events without a registered schema.
///
/// Unrecognized top-level fields are folded into `data` so nothing is
/// silently lost for unknown events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericPayload {
    /// The event's data, keyed however the emitter chose.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
}

impl GenericPayload {
    /// Build a generic payload from an arbitrary JSON value.
    ///
    /// Objects keep `timestamp` / `component_id` / `component_type` /
    /// `data` as the base fields and fold everything else into `data`;
    /// non-objects land under a `"raw_data"` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut payload = GenericPayload {
                    timestamp: Utc::now(),
                    ..Default::default()
                };
                for (key, value) in map {
                    match key.as_str() {
                        "timestamp" => {
                            if let Ok(ts) = serde_json::from_value(value) {
                                payload.timestamp = ts;
                            }
                        }
                        "component_id" => {
                            payload.component_id = value.as_str().map(String::from);
                        }
                        "component_type" => {
                            payload.component_type = value.as_str().map(String::from);
                        }
                        "data" => {
                            if let Value::Object(inner) = value {
                                // Explicit data map merges under existing keys.
                                for (k, v) in inner {
                                    payload.data.insert(k, v);
                                }
                            } else {
                                payload.data.insert("data".into(), value);
                            }
                        }
                        _ => {
                            payload.data.insert(key, value);
                        }
                    }
                }
                payload
            }
            other => {
                let mut data = Map::new();
                data.insert("raw_data".into(), other);
                GenericPayload {
                    data,
                    timestamp: Utc::now(),
                    ..Default::default()
                }
            }
        }
    }
}

impl Default for InputReceived {
    fn default() -> Self {
        Self {
            input: String::new(),
            inputs: Map::new(),
            session_id: None,
            timestamp: Utc::now(),
            component_id: None,
            component_type: None,
        }
    }
}

impl Default for GenericPayload {
    fn default() -> Self {
        Self {
            data: Map::new(),
            timestamp: Utc::now(),
            component_id: None,
            component_type: None,
        }
    }
}

/// The closed union of event payloads.
///
/// Serializes transparently as the inner struct; deserialization goes
/// through the payload registry, which knows the event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    InputReceived(InputReceived),
    AgentThought(AgentThought),
    AgentAction(AgentAction),
    ToolCall(ToolCall),
    ToolObservation(ToolObservation),
    AgentStepComplete(AgentStepComplete),
    AgentError(AgentError),
    UserInputRequest(UserInputRequest),
    UserInputResponse(UserInputResponse),
    Generic(GenericPayload),
}

impl Payload {
    /// The event name this payload's schema belongs to, or `None` for
    /// the generic variant (generic payloads travel under any event).
    pub fn schema_event(&self) -> Option<&'static str> {
        match self {
            Payload::InputReceived(_) => Some(events::INPUT_RECEIVED),
            Payload::AgentThought(_) => Some(events::AGENT_THOUGHT),
            Payload::AgentAction(_) => Some(events::AGENT_ACTION),
            Payload::ToolCall(_) => Some(events::TOOL_CALL),
            Payload::ToolObservation(_) => Some(events::TOOL_OBSERVATION),
            Payload::AgentStepComplete(_) => Some(events::AGENT_STEP_COMPLETE),
            Payload::AgentError(_) => Some(events::AGENT_ERROR),
            Payload::UserInputRequest(_) => Some(events::USER_INPUT_REQUEST),
            Payload::UserInputResponse(_) => Some(events::USER_INPUT_RESPONSE),
            Payload::Generic(_) => None,
        }
    }

    /// Component that emitted this payload, if attributed.
    pub fn component_id(&self) -> Option<&str> {
        match self {
            Payload::InputReceived(p) => p.component_id.as_deref(),
            Payload::AgentThought(p) => p.component_id.as_deref(),
            Payload::AgentAction(p) => p.component_id.as_deref(),
            Payload::ToolCall(p) => p.component_id.as_deref(),
            Payload::ToolObservation(p) => p.component_id.as_deref(),
            Payload::AgentStepComplete(p) => p.component_id.as_deref(),
            Payload::AgentError(p) => p.component_id.as_deref(),
            Payload::UserInputRequest(p) => p.component_id.as_deref(),
            Payload::UserInputResponse(p) => p.component_id.as_deref(),
            Payload::Generic(p) => p.component_id.as_deref(),
        }
    }

    /// When the payload was constructed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Payload::InputReceived(p) => p.timestamp,
            Payload::AgentThought(p) => p.timestamp,
            Payload::AgentAction(p) => p.timestamp,
            Payload::ToolCall(p) => p.timestamp,
            Payload::ToolObservation(p) => p.timestamp,
            Payload::AgentStepComplete(p) => p.timestamp,
            Payload::AgentError(p) => p.timestamp,
            Payload::UserInputRequest(p) => p.timestamp,
            Payload::UserInputResponse(p) => p.timestamp,
            Payload::Generic(p) => p.timestamp,
        }
    }

    /// Attribute this payload to a component, filling only unset fields.
    pub fn attribute(&mut self, component_id: &str, component_type: &str) {
        macro_rules! fill {
            ($p:expr) => {{
                if $p.component_id.is_none() {
                    $p.component_id = Some(component_id.to_string());
                }
                if $p.component_type.is_none() {
                    $p.component_type = Some(component_type.to_string());
                }
            }};
        }
        match self {
            Payload::InputReceived(p) => fill!(p),
            Payload::AgentThought(p) => fill!(p),
            Payload::AgentAction(p) => fill!(p),
            Payload::ToolCall(p) => fill!(p),
            Payload::ToolObservation(p) => fill!(p),
            Payload::AgentStepComplete(p) => fill!(p),
            Payload::AgentError(p) => fill!(p),
            Payload::UserInputRequest(p) => fill!(p),
            Payload::UserInputResponse(p) => fill!(p),
            Payload::Generic(p) => fill!(p),
        }
    }

    /// Validate the payload against its schema.
    ///
    /// Returns human-readable error strings; an empty list means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            Payload::InputReceived(p) => {
                if p.input.trim().is_empty() {
                    errors.push("input field cannot be empty".into());
                }
            }
            Payload::AgentThought(p) => {
                if p.thought.trim().is_empty() {
                    errors.push("thought field cannot be empty".into());
                }
            }
            Payload::AgentAction(p) => {
                if p.action.is_empty() {
                    errors.push("action field cannot be empty".into());
                }
            }
            Payload::ToolCall(p) => {
                if p.tool.trim().is_empty() {
                    errors.push("tool field cannot be empty".into());
                }
            }
            Payload::ToolObservation(p) => {
                if p.tool.trim().is_empty() {
                    errors.push("tool field cannot be empty".into());
                }
            }
            Payload::AgentStepComplete(p) => {
                if p.step < 0 {
                    errors.push("step field must be a non-negative integer".into());
                }
            }
            Payload::AgentError(p) => {
                if p.error.trim().is_empty() {
                    errors.push("error field cannot be empty".into());
                }
            }
            Payload::UserInputRequest(p) => {
                if p.request_id.trim().is_empty() {
                    errors.push("request_id field cannot be empty".into());
                }
                if p.question.trim().is_empty() {
                    errors.push("question field cannot be empty".into());
                }
            }
            Payload::UserInputResponse(p) => {
                if p.request_id.trim().is_empty() {
                    errors.push("request_id field cannot be empty".into());
                }
            }
            Payload::Generic(_) => {}
        }
        errors
    }

    /// Whether the payload passes validation.
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Serialize the payload to a JSON value (the inner struct's shape).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<GenericPayload> for Payload {
    fn from(p: GenericPayload) -> Self {
        Payload::Generic(p)
    }
}

impl From<InputReceived> for Payload {
    fn from(p: InputReceived) -> Self {
        Payload::InputReceived(p)
    }
}
