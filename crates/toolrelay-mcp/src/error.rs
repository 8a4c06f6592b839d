//! Error types for MCP operations.

use crate::handshake::SessionState;
use thiserror::Error;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("JSON-RPC error (code {code}): {message}")]
    Remote { code: i64, message: String },

    #[error("Tool '{tool}' reported an error: {message}")]
    RemoteTool { tool: String, message: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("MCP session is not ready (state: {state})")]
    NotReady { state: SessionState },

    #[error("Cannot {operation} from state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("MCP server process exited")]
    ProcessExited,

    #[error("Malformed tool result: {0}")]
    MalformedResult(String),

    #[error("Tool catalog has already been loaded for this session")]
    CatalogAlreadyLoaded,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether this error means the session can no longer carry traffic.
    ///
    /// Everything else is local to the call that raised it.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            McpError::Spawn { .. } | McpError::Transport(_) | McpError::ProcessExited
        )
    }
}
