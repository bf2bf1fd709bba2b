//! JSON-RPC 2.0 frames for tool-server communication.
//!
//! Request ids are UUID strings so they can double as correlation keys
//! in the component's pending-request map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{McpError, Result};

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_params")]
    pub params: Value,
}

fn default_params() -> Value {
    Value::Object(serde_json::Map::new())
}

impl JsonRpcRequest {
    /// Create a request with a fresh UUID id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Identifier of the request this responds to.
    pub id: String,
    /// Successful result (mutually exclusive with `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result (mutually exclusive with `result`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap into the result value, converting an error frame into
    /// [`McpError::Protocol`].
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(McpError::Protocol {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional structured error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Notification parameters.
    #[serde(default = "default_params")]
    pub params: Value,
}

impl JsonRpcNotification {
    /// Create a notification.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A server-to-client frame read off a channel's listen stream.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A response to one of our requests.
    Response(JsonRpcResponse),
    /// A server-initiated notification.
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Parse a wire frame. Frames with a `method` are notifications;
    /// everything else must parse as a response.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("method").is_some() {
            let notification: JsonRpcNotification = serde_json::from_value(value)?;
            Ok(IncomingMessage::Notification(notification))
        } else {
            let response: JsonRpcResponse = serde_json::from_value(value)?;
            Ok(IncomingMessage::Response(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let request = JsonRpcRequest::new("tools/list", json!({}));
        let text = serde_json::to_string(&request).unwrap();
        assert!(text.contains("\"jsonrpc\":\"2.0\""));
        assert!(text.contains("\"method\":\"tools/list\""));
        assert!(text.contains(&request.id));
    }

    #[test]
    fn request_ids_are_unique() {
        let a = JsonRpcRequest::new("ping", json!({}));
        let b = JsonRpcRequest::new("ping", json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn response_into_result_ok() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"x","result":{"tools":[]}}"#).unwrap();
        let result = response.into_result().unwrap();
        assert!(result["tools"].is_array());
    }

    #[test]
    fn response_into_result_error_frame() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"x","error":{"code":-32601,"message":"method not found"}}"#,
        )
        .unwrap();
        let err = response.into_result().unwrap_err();
        match err {
            McpError::Protocol { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("expected Protocol, got {other}"),
        }
    }

    #[test]
    fn missing_result_is_null() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"x"}"#).unwrap();
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn incoming_frame_with_method_is_notification() {
        let message =
            IncomingMessage::parse(r#"{"jsonrpc":"2.0","method":"tool/progress","params":{"pct":50}}"#)
                .unwrap();
        match message {
            IncomingMessage::Notification(n) => {
                assert_eq!(n.method, "tool/progress");
                assert_eq!(n.params["pct"], 50);
            }
            other => panic!("expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn incoming_frame_without_method_is_response() {
        let message =
            IncomingMessage::parse(r#"{"jsonrpc":"2.0","id":"r1","result":"ok"}"#).unwrap();
        assert!(matches!(message, IncomingMessage::Response(_)));
    }

    #[test]
    fn malformed_frame_is_error() {
        assert!(IncomingMessage::parse("not json").is_err());
    }

    #[test]
    fn notification_has_no_id_field() {
        let notification = JsonRpcNotification::new("server/status", json!({}));
        let text = serde_json::to_string(&notification).unwrap();
        assert!(!text.contains("\"id\""));
    }
}
