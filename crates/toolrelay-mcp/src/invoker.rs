//! Tool invocation via `tools/call`.

use crate::catalog::ToolCatalog;
use crate::correlator::RequestCorrelator;
use crate::error::McpError;
use crate::handshake::SessionStateCell;
use serde::Deserialize;
use std::time::Duration;

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(other)]
    Other,
}

/// Result of calling a tool on an MCP server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Text of the first content item, if that item is text.
    pub fn first_text(&self) -> Option<&str> {
        match self.content.first() {
            Some(ToolContent::Text { text }) => Some(text),
            _ => None,
        }
    }
}

/// Calls catalog tools through the correlator.
pub struct ToolInvoker<'a> {
    correlator: &'a RequestCorrelator,
    catalog: &'a ToolCatalog,
    state: &'a SessionStateCell,
    timeout: Duration,
}

impl<'a> ToolInvoker<'a> {
    pub fn new(
        correlator: &'a RequestCorrelator,
        catalog: &'a ToolCatalog,
        state: &'a SessionStateCell,
        timeout: Duration,
    ) -> Self {
        Self {
            correlator,
            catalog,
            state,
            timeout,
        }
    }

    /// Call a tool and return the text of its first content item.
    ///
    /// Arguments are forwarded as-is; the server validates them.
    pub async fn call(&self, name: &str, arguments: serde_json::Value) -> Result<String, McpError> {
        let result = self.call_raw(name, arguments).await?;

        if result.is_error {
            let message = result
                .first_text()
                .unwrap_or("tool reported an error without a message")
                .to_string();
            return Err(McpError::RemoteTool {
                tool: name.to_string(),
                message,
            });
        }

        match result.content.into_iter().next() {
            Some(ToolContent::Text { text }) => Ok(text),
            Some(_) => Err(McpError::MalformedResult(format!(
                "first content item from '{name}' is not text"
            ))),
            None => Err(McpError::MalformedResult(format!(
                "'{name}' returned no content"
            ))),
        }
    }

    /// Call a tool and return every content item, leaving `is_error` to the caller.
    pub async fn call_raw(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        self.state.ensure_ready()?;
        if self.catalog.lookup(name).is_none() {
            return Err(McpError::UnknownTool {
                name: name.to_string(),
            });
        }

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        tracing::debug!(tool = name, "calling MCP tool");
        let result = self
            .correlator
            .send("tools/call", Some(params), self.timeout)
            .await?;

        serde_json::from_value(result)
            .map_err(|e| McpError::MalformedResult(format!("Failed to parse tools/call result: {e}")))
    }
}
