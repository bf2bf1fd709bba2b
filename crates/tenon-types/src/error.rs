//! Error types for the tenon runtime.
//!
//! Provides [`TenonError`] as the framework-wide error type. Variants are
//! non-exhaustive to allow future extension without breaking downstream.

use thiserror::Error;

/// Framework-wide error type.
///
/// Variants are grouped into startup-time failures (which abort the
/// process with a non-zero exit) and traffic-time failures (which are
/// surfaced to the caller of the specific operation).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TenonError {
    // ── Startup ──────────────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid: dependency
    /// cycles, routing cycles, unresolvable target names, missing
    /// required keys.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    // ── Traffic ──────────────────────────────────────────────────────

    /// A reply did not arrive within the caller's timeout. An unknown
    /// target is indistinguishable from a slow one (components may
    /// register late), so "not found" surfaces here as well.
    #[error("response timeout: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out,
        /// including the target component name.
        operation: String,
    },

    /// The target component raised while handling `input`.
    #[error("component '{component}' failed: {message}")]
    Component {
        /// Name of the component that failed.
        component: String,
        /// The error text the component produced.
        message: String,
        /// Coarse classification of the failure (e.g. the variant name
        /// of the underlying error).
        error_type: String,
    },

    /// An outbound queue exceeded its configured maximum length; the
    /// message was dead-lettered instead of delivered.
    #[error("queue full for component '{component}'")]
    QueueFull {
        /// The target whose queue overflowed.
        component: String,
    },

    /// An in-flight operation was cancelled by runtime shutdown.
    /// Not logged as an error.
    #[error("cancelled by runtime shutdown")]
    Shutdown,

    /// A tool-server channel failed (connect, disconnect, transport).
    #[error("channel error: {0}")]
    Channel(String),

    /// A wire-protocol failure (malformed or error-framed reply).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TenonError {
    /// Build a [`TenonError::Component`] from a component name and any
    /// error value, using the error's type-ish display as classification.
    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
            error_type: "ComponentError".into(),
        }
    }

    /// Whether this error was caused by shutdown (awaiters treat it as
    /// expected, not a failure).
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TenonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_names_target() {
        let err = TenonError::Timeout {
            operation: "request to 'vector_db'".into(),
        };
        assert_eq!(err.to_string(), "response timeout: request to 'vector_db'");
    }

    #[test]
    fn component_error_display() {
        let err = TenonError::component("calc", "division by zero");
        assert_eq!(err.to_string(), "component 'calc' failed: division by zero");
        assert!(matches!(err, TenonError::Component { .. }));
    }

    #[test]
    fn queue_full_display() {
        let err = TenonError::QueueFull {
            component: "slow_sink".into(),
        };
        assert_eq!(err.to_string(), "queue full for component 'slow_sink'");
    }

    #[test]
    fn shutdown_is_flagged() {
        assert!(TenonError::Shutdown.is_shutdown());
        assert!(
            !TenonError::ConfigInvalid {
                reason: "x".into()
            }
            .is_shutdown()
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: TenonError = io_err.into();
        assert!(matches!(err, TenonError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad}}").unwrap_err();
        let err: TenonError = json_err.into();
        assert!(matches!(err, TenonError::Json(_)));
    }

    #[test]
    fn result_alias_works() {
        fn ok_fn() -> Result<i32> {
            Ok(7)
        }
        assert_eq!(ok_fn().unwrap(), 7);
    }
}
