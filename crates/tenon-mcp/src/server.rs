//! The tool-server framework component.
//!
//! [`McpServer`] wraps one channel and presents it as a pipeline
//! component of kind `tool_server`. Its blocking startup resolves the
//! server's metadata, connects the channel, performs the `initialize`
//! handshake, and caches the advertised capabilities so that agents
//! reading [`description`](tenon_core::Component::description) right
//! after the startup phase see real tools instead of a placeholder.
//!
//! Correlated requests of the form `{action, inputs}` become
//! `tools/call` invocations. Server notifications are mapped to
//! framework events and emitted through the component's bound handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tenon_core::{Component, ComponentHandle, ComponentInput};
use tenon_types::TenonError;
use tenon_types::spec::ComponentKind;

use crate::cache::CapabilityCache;
use crate::channel::{McpChannel, SendOutcome, create_channel};
use crate::error::{McpError, Result};
use crate::metadata::{Capabilities, ToolServerMetadata};
use crate::registry::{FeatureFlags, RegistryClient};
use crate::types::{IncomingMessage, JsonRpcRequest};

/// Default timeout for `tools/call`.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for handshake and listing calls.
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol revision this client speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// Configuration for one tool-server component.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Server identifier (e.g. `"github/mcp-server"`).
    pub server: String,
    /// Server version, or `"latest"`.
    pub version: String,
    /// Environment for header templates and subprocess launch.
    pub env: HashMap<String, String>,
    /// Server-specific behavior switches.
    pub flags: FeatureFlags,
    /// Timeout for tool invocations.
    pub call_timeout: Duration,
    /// Timeout for handshake and capability listing.
    pub list_timeout: Duration,
}

impl McpServerConfig {
    /// Config for a server identifier with default timeouts.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            version: "latest".into(),
            env: HashMap::new(),
            flags: FeatureFlags::default(),
            call_timeout: CALL_TIMEOUT,
            list_timeout: LIST_TIMEOUT,
        }
    }
}

/// A remote tool server exposed as a framework component.
pub struct McpServer {
    name: String,
    config: McpServerConfig,
    registry: RegistryClient,
    cache: CapabilityCache,
    preset_channel: Option<Arc<dyn McpChannel>>,
    channel: Mutex<Option<Arc<dyn McpChannel>>>,
    metadata: RwLock<Option<ToolServerMetadata>>,
    capabilities: RwLock<Option<Capabilities>>,
    pending: Pending,
    handle: Mutex<Option<ComponentHandle>>,
    listener_cancel: Mutex<Option<CancellationToken>>,
    started: AtomicBool,
    ready: AtomicBool,
}

impl McpServer {
    /// Component that resolves its channel through the registry at
    /// startup.
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self::build(name, config, None)
    }

    /// Component wired to an explicit channel, skipping registry
    /// resolution. The seam for tests and custom launchers.
    pub fn with_channel(
        name: impl Into<String>,
        config: McpServerConfig,
        channel: Arc<dyn McpChannel>,
    ) -> Self {
        Self::build(name, config, Some(channel))
    }

    fn build(
        name: impl Into<String>,
        config: McpServerConfig,
        preset_channel: Option<Arc<dyn McpChannel>>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            registry: RegistryClient::new(),
            cache: CapabilityCache::new(),
            preset_channel,
            channel: Mutex::new(None),
            metadata: RwLock::new(None),
            capabilities: RwLock::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            handle: Mutex::new(None),
            listener_cancel: Mutex::new(None),
            started: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    /// Resolve, connect, handshake, and discover capabilities.
    ///
    /// Idempotent: later calls return immediately.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(
            component = %self.name,
            server = %self.config.server,
            version = %self.config.version,
            "starting tool server"
        );

        let channel: Arc<dyn McpChannel> = match &self.preset_channel {
            Some(channel) => channel.clone(),
            None => {
                let metadata = self
                    .registry
                    .get_server(&self.config.server, &self.config.version, &self.config.flags)
                    .await?;
                let channel = create_channel(&metadata, &self.config.env)?;
                *self.metadata.write().expect("metadata lock poisoned") = Some(metadata);
                channel
            }
        };

        channel.connect().await?;
        *self.channel.lock().expect("channel lock poisoned") = Some(channel.clone());

        // Listener: resolves correlated replies and surfaces server
        // notifications as framework events.
        let cancel = CancellationToken::new();
        let pending = self.pending.clone();
        let component_handle = self.handle.lock().expect("handle lock poisoned").clone();
        let listener_channel = channel.clone();
        let component = self.name.clone();
        let listener_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = listener_cancel.cancelled() => {}
                _ = listen_loop(component, listener_channel, pending, component_handle) => {}
            }
        });
        *self
            .listener_cancel
            .lock()
            .expect("listener lock poisoned") = Some(cancel);

        // Handshake. Some servers work without an explicit initialize,
        // so a failure here degrades rather than aborts.
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": true },
                "sampling": {}
            },
            "clientInfo": {
                "name": "tenon",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        match self.rpc("initialize", params, self.config.list_timeout).await {
            Ok(result) => {
                debug!(
                    component = %self.name,
                    capabilities = ?result.get("capabilities"),
                    "session initialized"
                );
            }
            Err(e) => {
                warn!(component = %self.name, error = %e, "initialize failed, continuing");
            }
        }

        self.fetch_capabilities().await;
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Invoke a tool on the server.
    pub async fn call_tool(&self, action: &str, inputs: Map<String, Value>) -> Result<String> {
        if !self.started.load(Ordering::SeqCst) {
            info!(component = %self.name, "auto-starting on first use");
            self.start().await?;
        }

        debug!(component = %self.name, tool = %action, "calling tool");
        let params = json!({ "name": action, "arguments": inputs });
        let result = self
            .rpc("tools/call", params, self.config.call_timeout)
            .await?;
        Ok(stringify_result(result))
    }

    /// Health check via the optional `ping` method.
    pub async fn ping(&self) -> bool {
        if self.channel.lock().expect("channel lock poisoned").is_none() {
            return false;
        }
        self.rpc("ping", json!({}), Duration::from_secs(5))
            .await
            .is_ok()
    }

    /// Re-discover capabilities, replacing the cached set.
    pub async fn refresh_capabilities(&self) {
        info!(component = %self.name, "refreshing capabilities");
        self.cache
            .invalidate(&self.config.server, &self.config.version, &self.config.flags);
        *self
            .capabilities
            .write()
            .expect("capabilities lock poisoned") = None;
        self.fetch_capabilities().await;
    }

    /// The discovered capabilities, if the startup phase completed.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities
            .read()
            .expect("capabilities lock poisoned")
            .clone()
    }

    /// Detailed help text for one tool.
    pub fn tool_help(&self, tool_name: &str) -> String {
        let Some(capabilities) = self.capabilities() else {
            return format!("Tool '{tool_name}': capabilities not loaded");
        };
        let Some(tool) = capabilities.tools.iter().find(|t| t.name == tool_name) else {
            return format!("Tool '{tool_name}' not found");
        };

        let mut help = format!("Tool: {tool_name}\n");
        help.push_str(&format!(
            "Description: {}\n",
            if tool.description.is_empty() {
                "No description available"
            } else {
                &tool.description
            }
        ));
        if let Some(schema) = &tool.input_schema
            && let Some(properties) = schema.get("properties").and_then(Value::as_object)
        {
            let required: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            help.push_str("Parameters:\n");
            for (param, definition) in properties {
                let param_type = definition
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let description = definition
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("No description");
                let requirement = if required.contains(&param.as_str()) {
                    " (required)"
                } else {
                    " (optional)"
                };
                help.push_str(&format!(
                    "  - {param} ({param_type}){requirement}: {description}\n"
                ));
            }
        }
        help.trim_end().to_string()
    }

    /// Introspection snapshot.
    pub fn status(&self) -> Value {
        let mut status = json!({
            "name": self.name,
            "server": self.config.server,
            "version": self.config.version,
            "started": self.started.load(Ordering::SeqCst),
            "ready": self.ready.load(Ordering::SeqCst),
            "connected": self.channel.lock().expect("channel lock poisoned").is_some(),
            "pending_requests": self.pending.lock().expect("pending lock poisoned").len(),
        });
        if let Some(capabilities) = self.capabilities() {
            status["capabilities"] = json!({
                "tools": capabilities.tools.len(),
                "resources": capabilities.resources.len(),
                "prompts": capabilities.prompts.len(),
            });
        }
        status
    }

    async fn fetch_capabilities(&self) {
        let mut capabilities = Capabilities::default();

        for (method, field) in [
            ("tools/list", "tools"),
            ("resources/list", "resources"),
            ("prompts/list", "prompts"),
        ] {
            match self.rpc(method, json!({}), self.config.list_timeout).await {
                Ok(result) => {
                    let items = result.get(field).cloned().unwrap_or(json!([]));
                    match field {
                        "tools" => {
                            capabilities.tools = serde_json::from_value(items).unwrap_or_default()
                        }
                        "resources" => {
                            capabilities.resources =
                                serde_json::from_value(items).unwrap_or_default()
                        }
                        _ => {
                            capabilities.prompts = serde_json::from_value(items).unwrap_or_default()
                        }
                    }
                }
                Err(e) => {
                    warn!(component = %self.name, method = %method, error = %e, "listing failed");
                }
            }
        }

        info!(
            component = %self.name,
            tools = capabilities.tools.len(),
            resources = capabilities.resources.len(),
            prompts = capabilities.prompts.len(),
            "capabilities cached"
        );

        self.cache.store(
            &self.config.server,
            &self.config.version,
            &self.config.flags,
            capabilities.clone(),
        );
        *self
            .capabilities
            .write()
            .expect("capabilities lock poisoned") = Some(capabilities);
    }

    /// Send one JSON-RPC request and await its result, whichever way the
    /// transport delivers it.
    async fn rpc(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let channel = self
            .channel
            .lock()
            .expect("channel lock poisoned")
            .clone()
            .ok_or_else(|| McpError::Connection("channel not connected".into()))?;

        let request = JsonRpcRequest::new(method, params);
        let request_id = request.id.clone();

        // Register before sending so a fast reply cannot race the map.
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(request_id.clone(), tx);

        let outcome = match channel.send(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&request_id);
                return Err(e);
            }
        };

        match outcome {
            SendOutcome::Immediate(response) => {
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&request_id);
                response.into_result()
            }
            SendOutcome::Correlated(wire_id) => {
                // Some transports assign their own id; track the reply
                // under whatever the server will use.
                if wire_id != request_id {
                    let mut pending = self.pending.lock().expect("pending lock poisoned");
                    if let Some(tx) = pending.remove(&request_id) {
                        pending.insert(wire_id.clone(), tx);
                    }
                }
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_closed)) => Err(McpError::Connection(
                        "listener stopped before the reply arrived".into(),
                    )),
                    Err(_elapsed) => {
                        self.pending
                            .lock()
                            .expect("pending lock poisoned")
                            .remove(&wire_id);
                        Err(McpError::Timeout(format!(
                            "{method} timed out after {}s",
                            timeout.as_secs()
                        )))
                    }
                }
            }
        }
    }

    fn compose_description(&self) -> String {
        let base = {
            let metadata = self.metadata.read().expect("metadata lock poisoned");
            match metadata.as_ref() {
                Some(m) if !m.description.is_empty() => format!("MCP Server: {}", m.description),
                _ => format!(
                    "MCP Server: {}:{}",
                    self.config.server, self.config.version
                ),
            }
        };

        let Some(capabilities) = self.capabilities() else {
            return if self.started.load(Ordering::SeqCst) {
                format!("{base} (loading capabilities...)")
            } else {
                format!("{base} (initializing for tool discovery...)")
            };
        };

        if capabilities.total() == 0 {
            return format!("{base} (no capabilities available)");
        }

        let mut parts = vec![base];

        if !capabilities.tools.is_empty() {
            parts.push(format!(
                "\n\nAvailable tools ({}):",
                capabilities.tools.len()
            ));
            for (i, tool) in capabilities.tools.iter().enumerate() {
                let mut detail = format!("\n{:2}. {}", i + 1, tool.name);
                let description = if tool.description.is_empty() {
                    "No description"
                } else {
                    &tool.description
                };
                detail.push_str(&format!(
                    "\n    Description: {}",
                    escape_braces(description)
                ));

                if let Some(schema) = &tool.input_schema
                    && let Some(properties) = schema.get("properties").and_then(Value::as_object)
                {
                    let required: Vec<&str> = schema
                        .get("required")
                        .and_then(Value::as_array)
                        .map(|items| items.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();

                    let mut parameter_parts = Vec::new();
                    for (param, definition) in properties {
                        let param_type = definition
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown");
                        let status = if required.contains(&param.as_str()) {
                            "required"
                        } else {
                            "optional"
                        };
                        let description = definition
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if description.is_empty() {
                            parameter_parts.push(format!("{param} ({param_type}, {status})"));
                        } else {
                            parameter_parts.push(format!(
                                "{param} ({param_type}, {status}) - {}",
                                escape_braces(description)
                            ));
                        }
                    }
                    if !parameter_parts.is_empty() {
                        detail.push_str(&format!(
                            "\n    Parameters: {}",
                            parameter_parts.join("; ")
                        ));
                    }
                    if !required.is_empty() {
                        detail.push_str(&format!("\n    Required: {}", required.join(", ")));
                    }
                }
                parts.push(detail);
            }
        }

        if !capabilities.resources.is_empty() {
            parts.push(format!(
                "\n\nAvailable resources ({}):",
                capabilities.resources.len()
            ));
            for (i, resource) in capabilities.resources.iter().enumerate() {
                parts.push(format!(
                    "\n{:2}. {} ({})\n    Type: {}\n    Description: {}",
                    i + 1,
                    resource.name,
                    escape_braces(&resource.uri),
                    if resource.mime_type.is_empty() {
                        "unknown"
                    } else {
                        &resource.mime_type
                    },
                    escape_braces(if resource.description.is_empty() {
                        "No description"
                    } else {
                        &resource.description
                    }),
                ));
            }
        }

        if !capabilities.prompts.is_empty() {
            parts.push(format!(
                "\n\nAvailable prompts ({}):",
                capabilities.prompts.len()
            ));
            for (i, prompt) in capabilities.prompts.iter().enumerate() {
                let mut detail = format!(
                    "\n{:2}. {}\n    Description: {}",
                    i + 1,
                    prompt.name,
                    escape_braces(if prompt.description.is_empty() {
                        "No description"
                    } else {
                        &prompt.description
                    }),
                );
                if let Some(arguments) = prompt.arguments.as_ref().and_then(Value::as_array) {
                    let names: Vec<&str> = arguments
                        .iter()
                        .filter_map(|arg| arg.get("name").and_then(Value::as_str))
                        .collect();
                    if !names.is_empty() {
                        detail.push_str(&format!("\n    Arguments: {}", names.join(", ")));
                    }
                }
                parts.push(detail);
            }
        }

        parts.concat()
    }
}

#[async_trait]
impl Component for McpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::ToolServer
    }

    fn description(&self) -> String {
        self.compose_description()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn bind(&self, handle: ComponentHandle) {
        *self.handle.lock().expect("handle lock poisoned") = Some(handle);
    }

    async fn async_startup(&self) -> tenon_types::Result<()> {
        self.start().await.map_err(Into::into)
    }

    async fn input(&self, input: ComponentInput) -> tenon_types::Result<Option<Value>> {
        match input {
            ComponentInput::Call { action, inputs } => {
                let text = self.call_tool(&action, inputs).await?;
                Ok(Some(Value::String(text)))
            }
            ComponentInput::Data(_) => Err(TenonError::Protocol(
                "tool-server input requires an action and inputs".into(),
            )),
            // Routed observations are not tool calls.
            ComponentInput::Event { .. } => Ok(None),
        }
    }

    async fn close(&self) -> tenon_types::Result<()> {
        if let Some(cancel) = self
            .listener_cancel
            .lock()
            .expect("listener lock poisoned")
            .take()
        {
            cancel.cancel();
        }

        let channel = self.channel.lock().expect("channel lock poisoned").take();
        if let Some(channel) = channel
            && let Err(e) = channel.close().await
        {
            warn!(component = %self.name, error = %e, "channel close failed");
        }

        let pending: Vec<_> = {
            let mut map = self.pending.lock().expect("pending lock poisoned");
            map.drain().collect()
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(McpError::Connection("channel closed".into())));
        }

        self.cache
            .invalidate(&self.config.server, &self.config.version, &self.config.flags);
        self.ready.store(false, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

async fn listen_loop(
    component: String,
    channel: Arc<dyn McpChannel>,
    pending: Pending,
    handle: Option<ComponentHandle>,
) {
    while let Some(message) = channel.next_message().await {
        match message {
            IncomingMessage::Response(response) => {
                let sender = pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&response.id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response.into_result());
                    }
                    None => {
                        warn!(
                            component = %component,
                            id = %response.id,
                            "response with no pending request"
                        );
                    }
                }
            }
            IncomingMessage::Notification(notification) => {
                let Some(event) = framework_event(&notification.method) else {
                    debug!(
                        component = %component,
                        method = %notification.method,
                        "ignoring unknown notification"
                    );
                    continue;
                };
                match &handle {
                    Some(handle) => {
                        debug!(component = %component, event = %event, "emitting notification");
                        handle.emit(event, notification.params).await;
                    }
                    None => {
                        warn!(component = %component, event = %event, "no bound handle for notification");
                    }
                }
            }
        }
    }
    debug!(component = %component, "listener stopped");
}

/// Map a server notification method to the framework event it becomes.
fn framework_event(method: &str) -> Option<&'static str> {
    match method {
        "tool/progress" => Some("tool.progress"),
        "resource/updated" => Some("resource.changed"),
        "server/status" => Some("mcp.status"),
        "notifications/cancelled" => Some("mcp.cancelled"),
        _ => None,
    }
}

/// Flatten a tool result for agent consumption: objects and arrays as
/// pretty JSON, strings as-is, `null` as empty.
fn stringify_result(result: Value) -> String {
    match result {
        Value::Null => String::new(),
        Value::String(text) => text,
        value @ (Value::Object(_) | Value::Array(_)) => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}
