//! The component trait and the built-in console sink.
//!
//! A component is a named unit with an `input` operation and optional
//! downstream targets. The runtime manages the lifecycle:
//!
//! 1. The resolver constructs components in dependency order.
//! 2. The registry calls [`bind`](Component::bind) with a
//!    [`ComponentHandle`] so the component can emit events and make
//!    requests.
//! 3. Components that need remote capability discovery implement
//!    [`async_startup`](Component::async_startup); the startup
//!    coordinator awaits it before traffic starts.
//! 4. `input` receives routed events and correlated requests.
//! 5. `close` runs on shutdown, in reverse construction order.

use async_trait::async_trait;
use serde_json::{Map, Value};

use tenon_types::spec::ComponentKind;
use tenon_types::{Payload, Result};

use crate::runtime::ComponentHandle;

/// What a component receives through its `input` operation.
#[derive(Debug, Clone)]
pub enum ComponentInput {
    /// A routed event delivery. `input.received` is delivered to any
    /// target; other events are delivered only to output-kind sinks.
    Event {
        /// The event name.
        event: String,
        /// The (possibly pipe-transformed) payload.
        payload: Payload,
    },
    /// A correlated request carrying free-form data.
    Data(Value),
    /// A correlated tool invocation (`action` + named inputs).
    Call {
        /// Tool or operation name.
        action: String,
        /// Named arguments.
        inputs: Map<String, Value>,
    },
}

impl ComponentInput {
    /// Build from correlated-request data: `{action, inputs}` maps
    /// become [`Call`](ComponentInput::Call), everything else is
    /// [`Data`](ComponentInput::Data).
    pub fn from_request_data(data: Value) -> Self {
        if let Value::Object(ref map) = data
            && let (Some(Value::String(action)), Some(inputs)) =
                (map.get("action"), map.get("inputs"))
        {
            let inputs = match inputs {
                Value::Object(m) => m.clone(),
                _ => Map::new(),
            };
            return ComponentInput::Call {
                action: action.clone(),
                inputs,
            };
        }
        ComponentInput::Data(data)
    }

    /// The input text, when this is an `input.received` event delivery.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ComponentInput::Event {
                payload: Payload::InputReceived(p),
                ..
            } => Some(&p.input),
            _ => None,
        }
    }
}

/// A named unit in the pipeline graph.
#[async_trait]
pub trait Component: Send + Sync {
    /// Unique component name within the runtime.
    fn name(&self) -> &str;

    /// Role of the component.
    fn kind(&self) -> ComponentKind;

    /// Human-readable description for peers that compose documentation
    /// (agents reading available tools). May return a loading sentinel
    /// until [`async_startup`](Component::async_startup) completes.
    fn description(&self) -> String {
        String::new()
    }

    /// Whether the component emits its own response events from inside
    /// `input`. When `false` (the default), the router auto-emits a
    /// kind-appropriate response event for non-null `input` results.
    fn emits_responses(&self) -> bool {
        false
    }

    /// Whether capability discovery has completed. Components without
    /// blocking startup are always ready.
    fn is_ready(&self) -> bool {
        true
    }

    /// Receive the runtime handle at registration time.
    fn bind(&self, _handle: ComponentHandle) {}

    /// Blocking initialization run by the startup coordinator before the
    /// main loop starts. Tool-server components discover capabilities
    /// here. The default is a no-op.
    async fn async_startup(&self) -> Result<()> {
        Ok(())
    }

    /// Handle a routed event or correlated request.
    ///
    /// Returning `Ok(Some(value))` from a routed `input.received`
    /// delivery triggers auto-emission of a response event unless
    /// [`emits_responses`](Component::emits_responses) is `true`.
    async fn input(&self, input: ComponentInput) -> Result<Option<Value>>;

    /// Yield the next external work item. Only input-kind components
    /// implement this; `None` ends the main loop.
    async fn next_input(&self) -> Option<String> {
        None
    }

    /// Release resources. Must be idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The reserved `_console_output` sink.
///
/// Always registered; prints whatever is routed to it on standard
/// output. Used as the inferred fallback target for agents when no
/// output component is declared.
pub struct ConsoleOutput;

#[async_trait]
impl Component for ConsoleOutput {
    fn name(&self) -> &str {
        tenon_types::spec::CONSOLE_OUTPUT
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    fn description(&self) -> String {
        "Prints routed payloads to standard output".into()
    }

    async fn input(&self, input: ComponentInput) -> Result<Option<Value>> {
        match input {
            ComponentInput::Event { payload, .. } => {
                if let Payload::Generic(generic) = &payload
                    && let Some(Value::String(response)) = generic.data.get("response")
                {
                    println!("{response}");
                } else {
                    println!("{}", payload.to_value());
                }
            }
            ComponentInput::Data(value) => println!("{value}"),
            ComponentInput::Call { action, .. } => println!("{action}"),
        }
        Ok(None)
    }
}
