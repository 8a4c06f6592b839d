//! JSON-RPC 2.0 types for MCP communication.

use crate::error::McpError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One inbound line, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A response addressed to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Carries our id but is neither a success nor a well-formed error.
    Invalid { id: u64, reason: String },
    /// A server-initiated request or notification, or anything without an id.
    Unsolicited { method: Option<String> },
}

/// Wire shape of any inbound message before classification.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Distinguishes `"result": null` (a valid empty result) from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Inbound {
    /// Parse and classify one line from the server's stdout.
    pub fn parse(line: &str) -> Result<Self, McpError> {
        let raw: RawMessage = serde_json::from_str(line)
            .map_err(|e| McpError::Protocol(format!("invalid JSON-RPC message: {e}")))?;

        if raw.method.is_some() {
            return Ok(Inbound::Unsolicited { method: raw.method });
        }

        let id = match raw.id {
            None | Some(Value::Null) => return Ok(Inbound::Unsolicited { method: None }),
            Some(id) => parse_id(&id)?,
        };

        Ok(match (raw.result, raw.error) {
            (_, Some(error)) => match serde_json::from_value::<JsonRpcError>(error) {
                Ok(error) => Inbound::Response {
                    id,
                    outcome: Err(error),
                },
                Err(e) => Inbound::Invalid {
                    id,
                    reason: format!("malformed error object: {e}"),
                },
            },
            (Some(result), None) => Inbound::Response {
                id,
                outcome: Ok(result),
            },
            (None, None) => Inbound::Invalid {
                id,
                reason: "response has neither result nor error".to_string(),
            },
        })
    }
}

/// Ids are sent as integers; some servers echo them back as numeric strings.
fn parse_id(id: &Value) -> Result<u64, McpError> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| McpError::Protocol(format!("unsupported response id: {id}")))
}
