//! Tool-server metadata and capabilities.
//!
//! [`ToolServerMetadata`] is what the registry hands back for a server
//! identifier: how to reach the server (local package or remote
//! endpoint) and what environment it needs. [`Capabilities`] is what the
//! server itself advertises once connected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{McpError, Result};

/// Transport selected for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Local subprocess over stdin/stdout.
    Stdio,
    /// Remote server-sent-events stream plus a POST endpoint.
    Sse,
    /// Remote plain HTTP request/response.
    Http,
    /// Remote WebSocket (metadata only; no channel implementation).
    WebSocket,
}

/// A locally runnable package (OCI container or native binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package kind, e.g. `"oci"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Image or binary identifier.
    pub identifier: String,
    /// Package version tag.
    pub version: String,
    /// Registry prefix for OCI images.
    #[serde(default)]
    pub registry_base_url: String,
}

/// A header attached to remote requests. Values may contain `{VAR}`
/// placeholders substituted from the environment map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderSpec {
    /// Header name.
    pub name: String,
    /// Header value template.
    pub value: String,
}

/// A remote endpoint for a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInfo {
    /// Endpoint kind: `"sse"`, `"http"`, `"streamable-http"`, `"websocket"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Endpoint URL.
    pub url: String,
    /// Headers to send (templated).
    #[serde(default)]
    pub headers: Vec<HeaderSpec>,
}

/// An environment variable a server needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarSpec {
    /// Variable name.
    pub name: String,
    /// Whether startup must fail when it is absent.
    #[serde(default = "default_true")]
    pub required: bool,
    /// What the variable is for.
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

/// Everything the registry knows about a tool server.
///
/// At least one package or remote entry must be present for the
/// metadata to be usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerMetadata {
    /// Server identifier.
    pub name: String,
    /// Server version.
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Locally runnable packages.
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
    /// Remote endpoints.
    #[serde(default)]
    pub remotes: Vec<RemoteInfo>,
    /// Environment requirements.
    #[serde(default)]
    pub env_vars: Vec<EnvVarSpec>,
}

impl ToolServerMetadata {
    /// Pick the transport to use, in preference order: local stdio
    /// package, then SSE, HTTP, and WebSocket remotes.
    ///
    /// Errors with the list of what *was* available when nothing
    /// supported matches.
    pub fn preferred_transport(&self) -> Result<TransportKind> {
        for package in &self.packages {
            if package.kind == "oci" || package.kind == "binary" {
                return Ok(TransportKind::Stdio);
            }
        }
        for remote in &self.remotes {
            match remote.kind.as_str() {
                "sse" => return Ok(TransportKind::Sse),
                "http" | "streamable-http" => return Ok(TransportKind::Http),
                "websocket" => return Ok(TransportKind::WebSocket),
                _ => {}
            }
        }

        let mut available: Vec<String> = self
            .packages
            .iter()
            .map(|p| format!("package:{}", p.kind))
            .collect();
        available.extend(self.remotes.iter().map(|r| format!("remote:{}", r.kind)));
        if available.is_empty() {
            Err(McpError::UnsupportedTransport(format!(
                "no transports available for {}; server metadata may be incomplete",
                self.name
            )))
        } else {
            Err(McpError::UnsupportedTransport(format!(
                "no supported transport for {}; available: {}",
                self.name,
                available.join(", ")
            )))
        }
    }

    /// The stdio package to launch, when one exists.
    pub fn stdio_package(&self) -> Option<&PackageInfo> {
        self.packages
            .iter()
            .find(|p| p.kind == "oci" || p.kind == "binary")
    }

    /// The first remote of one of the given kinds.
    pub fn remote_of(&self, kinds: &[&str]) -> Option<&RemoteInfo> {
        self.remotes
            .iter()
            .find(|r| kinds.contains(&r.kind.as_str()))
    }
}

/// One callable tool advertised by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments.
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// One readable resource advertised by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Resource URI.
    #[serde(default)]
    pub uri: String,
    /// Resource name.
    pub name: String,
    /// What the resource contains.
    #[serde(default)]
    pub description: String,
    /// Media type.
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

/// One prompt template advertised by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptInfo {
    /// Prompt name.
    pub name: String,
    /// What the prompt is for.
    #[serde(default)]
    pub description: String,
    /// Prompt arguments, verbatim from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// A server's advertised capabilities, cached after discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Callable tools.
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    /// Readable resources.
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
    /// Prompt templates.
    #[serde(default)]
    pub prompts: Vec<PromptInfo>,
}

impl Capabilities {
    /// Total number of advertised capabilities.
    pub fn total(&self) -> usize {
        self.tools.len() + self.resources.len() + self.prompts.len()
    }
}
