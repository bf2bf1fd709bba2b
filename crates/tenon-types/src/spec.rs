//! Post-parse component specifications.
//!
//! The configuration-file parser is an external collaborator; what the
//! runtime consumes is this shape: one [`ComponentSpec`] per declared
//! component, in a map keyed by name. The `config` map may carry a `to`
//! key (routing targets), plus `hooks` / `pipes` script declarations that
//! the embedding application resolves into callables before startup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved name of the built-in console sink. Always registered;
/// routing to it prints payloads to standard output.
pub const CONSOLE_OUTPUT: &str = "_console_output";

/// Coarse role of a component in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Receives external work and feeds the pipeline.
    Input,
    /// Reasons over inputs (LLM or otherwise).
    Agent,
    /// Performs a concrete capability on request.
    Tool,
    /// Terminal consumer of pipeline results.
    Output,
    /// Wraps a remote tool-provider server.
    ToolServer,
    /// Anything else.
    Other,
}

impl ComponentKind {
    /// Stable lowercase name, matching the wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Input => "input",
            ComponentKind::Agent => "agent",
            ComponentKind::Tool => "tool",
            ComponentKind::Output => "output",
            ComponentKind::ToolServer => "tool_server",
            ComponentKind::Other => "other",
        }
    }

    /// Event auto-emitted when a component of this kind returns a value
    /// from `input` without emitting anything itself.
    pub fn response_event(&self) -> &'static str {
        match self {
            ComponentKind::Agent => crate::payload::events::AGENT_RESPONSE,
            ComponentKind::Tool | ComponentKind::ToolServer => {
                crate::payload::events::TOOL_OBSERVATION
            }
            _ => crate::payload::events::COMPONENT_RESPONSE,
        }
    }
}

/// A hook or pipe declared in config as an external script.
///
/// Carried through untouched; resolving `script_path` into a callable is
/// the host application's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Event the callback subscribes to.
    pub event: String,
    /// Path to the script file.
    pub script_path: String,
    /// Function to load from the script.
    pub function_name: String,
}

/// One component as produced by the config parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Unique component name.
    pub name: String,

    /// Role of the component.
    pub kind: ComponentKind,

    /// Concrete type within the kind (e.g. `"command_line"`, `"openai"`).
    #[serde(rename = "type")]
    pub type_name: String,

    /// Free-form configuration for the component constructor.
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Names of components this one depends on; constructed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ComponentSpec {
    /// Create a spec with an empty config.
    pub fn new(name: impl Into<String>, kind: ComponentKind, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            type_name: type_name.into(),
            config: Map::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set a config value (builder-style, mostly for tests).
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Declare a dependency (builder-style).
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Extract routing targets from the `to` config key.
    ///
    /// Accepts a string, a list of strings, or an object carrying a
    /// `name` field (a component reference reduced to its name). Anything
    /// else yields no targets.
    pub fn route_targets(&self) -> Vec<String> {
        extract_targets(self.config.get("to"))
    }

    /// Hook declarations from the `hooks` config key.
    pub fn hook_specs(&self) -> Vec<ScriptSpec> {
        extract_scripts(self.config.get("hooks"))
    }

    /// Pipe declarations from the `pipes` config key.
    pub fn pipe_specs(&self) -> Vec<ScriptSpec> {
        extract_scripts(self.config.get("pipes"))
    }
}

fn extract_targets(to: Option<&Value>) -> Vec<String> {
    match to {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Object(obj) => obj
                    .get("name")
                    .and_then(Value::as_str)
                    .map(String::from),
                _ => None,
            })
            .collect(),
        Some(Value::Object(obj)) => obj
            .get("name")
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn extract_scripts(value: Option<&Value>) -> Vec<ScriptSpec> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn targets_from_string() {
        let spec = ComponentSpec::new("inp", ComponentKind::Input, "command_line")
            .with_config("to", json!("agent"));
        assert_eq!(spec.route_targets(), vec!["agent"]);
    }

    #[test]
    fn targets_from_list() {
        let spec = ComponentSpec::new("ag", ComponentKind::Agent, "openai")
            .with_config("to", json!(["out1", "out2"]));
        assert_eq!(spec.route_targets(), vec!["out1", "out2"]);
    }

    #[test]
    fn targets_from_reference_object() {
        let spec = ComponentSpec::new("ag", ComponentKind::Agent, "openai")
            .with_config("to", json!({"name": "console", "kind": "output"}));
        assert_eq!(spec.route_targets(), vec!["console"]);
    }

    #[test]
    fn no_to_key_means_no_targets() {
        let spec = ComponentSpec::new("ag", ComponentKind::Agent, "openai");
        assert!(spec.route_targets().is_empty());
    }

    #[test]
    fn invalid_to_values_ignored() {
        let spec = ComponentSpec::new("ag", ComponentKind::Agent, "openai")
            .with_config("to", json!(42));
        assert!(spec.route_targets().is_empty());

        let spec = ComponentSpec::new("ag", ComponentKind::Agent, "openai")
            .with_config("to", json!(["ok", 13, {"name": "ref"}]));
        assert_eq!(spec.route_targets(), vec!["ok", "ref"]);
    }

    #[test]
    fn hook_specs_parse() {
        let spec = ComponentSpec::new("ag", ComponentKind::Agent, "openai").with_config(
            "hooks",
            json!([{
                "event": "agent.thought",
                "script_path": "hooks/logging.py",
                "function_name": "on_thought"
            }]),
        );
        let hooks = spec.hook_specs();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].event, "agent.thought");
        assert_eq!(hooks[0].function_name, "on_thought");
    }

    #[test]
    fn response_event_per_kind() {
        assert_eq!(ComponentKind::Agent.response_event(), "agent.response");
        assert_eq!(ComponentKind::Tool.response_event(), "tool.observation");
        assert_eq!(
            ComponentKind::ToolServer.response_event(),
            "tool.observation"
        );
        assert_eq!(
            ComponentKind::Output.response_event(),
            "component.response"
        );
    }

    #[test]
    fn spec_serde_roundtrip() {
        let spec = ComponentSpec::new("kb", ComponentKind::Tool, "vector_db")
            .with_config("collection", json!("docs"))
            .with_dependency("embedder");
        let text = serde_json::to_string(&spec).unwrap();
        let restored: ComponentSpec = serde_json::from_str(&text).unwrap();
        assert_eq!(restored.name, "kb");
        assert_eq!(restored.kind, ComponentKind::Tool);
        assert_eq!(restored.type_name, "vector_db");
        assert_eq!(restored.depends_on, vec!["embedder"]);
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ComponentKind::ToolServer).unwrap(),
            "\"tool_server\""
        );
    }
}
