//! Tool-server error types.

use thiserror::Error;

/// Errors produced by the tool-server subsystem.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum McpError {
    /// The transport could not connect or disconnected.
    #[error("connection error: {0}")]
    Connection(String),

    /// Sending or receiving on an established channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a JSON-RPC error frame.
    #[error("protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code.
        code: i64,
        /// Server-supplied error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// The server identifier resolved nowhere: cache, registry, and the
    /// fallback table all came up empty.
    #[error("tool server not found: {0}")]
    ServerNotFound(String),

    /// Required environment variables were not supplied.
    #[error("missing required environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    /// The server's metadata offers no transport this crate implements.
    #[error("no supported transport: {0}")]
    UnsupportedTransport(String),

    /// A call did not complete within its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Build a [`McpError::Protocol`] from a JSON-RPC error object.
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, McpError>;

impl From<McpError> for tenon_types::TenonError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Timeout(operation) => tenon_types::TenonError::Timeout { operation },
            McpError::Protocol { code, message, .. } => {
                tenon_types::TenonError::Protocol(format!("{code}: {message}"))
            }
            other => tenon_types::TenonError::Channel(other.to_string()),
        }
    }
}
