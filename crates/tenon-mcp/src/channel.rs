//! The channel abstraction and channel factory.
//!
//! A channel is a bidirectional transport carrying JSON-RPC frames to
//! one tool server. Three implementations exist: [`StdioChannel`]
//! (subprocess), [`SseChannel`] (event stream + POST), and
//! [`HttpChannel`] (request/response). WebSocket appears in metadata but
//! has no implementation here.
//!
//! Header values and subprocess environments are templated: `{VAR}`
//! placeholders are substituted from the supplied environment map, and
//! required variables that are missing abort startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{McpError, Result};
use crate::http::HttpChannel;
use crate::metadata::{RemoteInfo, ToolServerMetadata, TransportKind};
use crate::sse::SseChannel;
use crate::stdio::StdioChannel;
use crate::types::{IncomingMessage, JsonRpcRequest, JsonRpcResponse};

/// What a [`send`](McpChannel::send) produced.
#[derive(Debug)]
pub enum SendOutcome {
    /// The request went out; its response will arrive on the listen
    /// stream, keyed by this request id.
    Correlated(String),
    /// The transport is request/response: here is the reply.
    Immediate(JsonRpcResponse),
}

/// A bidirectional JSON-RPC transport to one tool server.
///
/// Channels are owned by exactly one tool-server component; closing the
/// component closes the channel. `close` must be idempotent and release
/// every resource (subprocess, socket, stream).
#[async_trait]
pub trait McpChannel: Send + Sync {
    /// Establish the connection.
    async fn connect(&self) -> Result<()>;

    /// Send a request frame.
    async fn send(&self, request: JsonRpcRequest) -> Result<SendOutcome>;

    /// Pull the next server-to-client frame.
    ///
    /// This is the lazy listen sequence: `None` means the stream ended.
    /// Transports without a listen stream (HTTP) always return `None`.
    async fn next_message(&self) -> Option<IncomingMessage>;

    /// Tear down the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Substitute `{VAR}` placeholders in `template` from the environment
/// map. Unknown placeholders are left intact.
pub fn substitute_env(template: &str, env: &HashMap<String, String>) -> String {
    let mut value = template.to_string();
    for (name, replacement) in env {
        let placeholder = format!("{{{name}}}");
        if value.contains(&placeholder) {
            value = value.replace(&placeholder, replacement);
        }
    }
    value
}

/// Check that every required environment variable is present.
pub fn validate_env(metadata: &ToolServerMetadata, env: &HashMap<String, String>) -> Result<()> {
    let missing: Vec<String> = metadata
        .env_vars
        .iter()
        .filter(|var| var.required && !env.contains_key(&var.name))
        .map(|var| var.name.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(McpError::MissingEnvVars(missing))
    }
}

/// Resolve a remote's header templates against the environment.
pub fn resolve_headers(remote: &RemoteInfo, env: &HashMap<String, String>) -> Vec<(String, String)> {
    remote
        .headers
        .iter()
        .map(|header| (header.name.clone(), substitute_env(&header.value, env)))
        .collect()
}

/// Build the channel for a server's preferred transport.
///
/// Validates the environment first; the returned channel is not yet
/// connected.
pub fn create_channel(
    metadata: &ToolServerMetadata,
    env: &HashMap<String, String>,
) -> Result<Arc<dyn McpChannel>> {
    validate_env(metadata, env)?;

    match metadata.preferred_transport()? {
        TransportKind::Stdio => {
            let package = metadata.stdio_package().ok_or_else(|| {
                McpError::UnsupportedTransport(format!(
                    "no runnable package for {}",
                    metadata.name
                ))
            })?;
            Ok(Arc::new(StdioChannel::from_package(package, env.clone())))
        }
        TransportKind::Sse => {
            let remote = metadata.remote_of(&["sse"]).ok_or_else(|| {
                McpError::UnsupportedTransport(format!("no SSE remote for {}", metadata.name))
            })?;
            Ok(Arc::new(SseChannel::new(
                remote.url.clone(),
                resolve_headers(remote, env),
            )))
        }
        TransportKind::Http => {
            let remote = metadata
                .remote_of(&["http", "streamable-http"])
                .ok_or_else(|| {
                    McpError::UnsupportedTransport(format!(
                        "no HTTP remote for {}",
                        metadata.name
                    ))
                })?;
            Ok(Arc::new(HttpChannel::new(
                remote.url.clone(),
                resolve_headers(remote, env),
            )))
        }
        TransportKind::WebSocket => Err(McpError::UnsupportedTransport(
            "websocket transport is not implemented".into(),
        )),
    }
}
