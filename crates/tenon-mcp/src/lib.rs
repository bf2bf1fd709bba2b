//! # tenon-mcp
//!
//! Tool-server integration for the tenon runtime: connects to remote
//! tool-provider servers speaking JSON-RPC 2.0 (the Model Context
//! Protocol) over stdio, server-sent events, or plain HTTP, negotiates
//! capabilities, and exposes each server as a framework component.
//!
//! - **[`types`]** -- JSON-RPC request/response/notification frames
//! - **[`metadata`]** -- server metadata, transport preference, capabilities
//! - **[`channel`]** -- the [`McpChannel`] transport trait and channel factory
//! - **[`stdio`]**, **[`sse`]**, **[`http`]** -- concrete transports
//! - **[`registry`]** -- registry client with TTL cache and fallbacks
//! - **[`cache`]** -- capability cache keyed by server/version/flags
//! - **[`server`]** -- the [`McpServer`] framework component

pub mod cache;
pub mod channel;
pub mod error;
pub mod http;
pub mod metadata;
pub mod registry;
pub mod server;
pub mod sse;
pub mod stdio;
pub mod types;

pub use cache::CapabilityCache;
pub use channel::{McpChannel, SendOutcome, create_channel};
pub use error::{McpError, Result};
pub use metadata::{Capabilities, ToolServerMetadata, TransportKind};
pub use registry::{FeatureFlags, RegistryClient};
pub use server::{McpServer, McpServerConfig};
pub use types::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
