//! Tool discovery via `tools/list`.
//!
//! The catalog is fetched once after the handshake and stays fixed for the
//! rest of the session.

use crate::correlator::RequestCorrelator;
use crate::error::McpError;
use crate::handshake::SessionStateCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

/// A tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Debug)]
struct ToolSet {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    fn parse(mut result: serde_json::Value) -> Result<Self, McpError> {
        let entries = match result.get_mut("tools").map(serde_json::Value::take) {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => {
                return Err(McpError::Protocol(
                    "tools/list response has no tools array".to_string(),
                ));
            }
        };

        let mut tools = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());
        for entry in entries {
            let entry: ToolEntry = match serde_json::from_value(entry) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping malformed tool entry: {e}");
                    continue;
                }
            };
            if index.contains_key(&entry.name) {
                tracing::warn!("Duplicate tool '{}' in tools/list, keeping the first", entry.name);
                continue;
            }
            index.insert(entry.name.clone(), tools.len());
            tools.push(Tool {
                name: entry.name,
                description: entry.description.unwrap_or_default(),
                input_schema: entry.input_schema,
            });
        }

        Ok(Self { tools, index })
    }
}

/// The tools a session's server offers, populated at most once.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    loaded: OnceLock<ToolSet>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue `tools/list` and store the result.
    ///
    /// Requires a ready session. A failed fetch leaves the catalog empty and
    /// may be retried; a successful one cannot be repeated.
    pub async fn fetch(
        &self,
        correlator: &RequestCorrelator,
        state: &SessionStateCell,
        timeout: Duration,
    ) -> Result<&[Tool], McpError> {
        state.ensure_ready()?;
        if self.is_loaded() {
            return Err(McpError::CatalogAlreadyLoaded);
        }

        let result = correlator
            .send("tools/list", Some(serde_json::json!({})), timeout)
            .await?;
        let set = ToolSet::parse(result)?;

        self.loaded
            .set(set)
            .map_err(|_| McpError::CatalogAlreadyLoaded)?;
        let tools = self.tools();
        tracing::info!("Discovered {} MCP tools", tools.len());
        Ok(tools)
    }

    pub fn lookup(&self, name: &str) -> Option<&Tool> {
        let set = self.loaded.get()?;
        set.index.get(name).map(|&i| &set.tools[i])
    }

    /// All tools in server order; empty until fetched.
    pub fn tools(&self) -> &[Tool] {
        self.loaded.get().map(|set| set.tools.as_slice()).unwrap_or(&[])
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::SessionState;
    use crate::testing::{ScriptedServer, ready_session, respond, social_server};
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn fetch_populates_catalog_in_order() {
        let session = ready_session(social_server).await;
        let catalog = ToolCatalog::new();

        let tools = catalog
            .fetch(&session.correlator, &session.state, TIMEOUT)
            .await
            .unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["extract_github_repo_summary", "post_to_instagram", "explode"]
        );

        let summary = catalog.lookup("extract_github_repo_summary").unwrap();
        assert_eq!(summary.input_schema["required"], json!(["repo_url"]));
        assert!(catalog.lookup("missing").is_none());

        let written = session.server.written();
        assert_eq!(written.last().unwrap()["method"], "tools/list");
    }

    #[tokio::test]
    async fn missing_fields_get_defaults() {
        let session = ready_session(|req| {
            Some(respond(req, json!({"tools": [{"name": "bare"}]})))
        })
        .await;
        let catalog = ToolCatalog::new();
        catalog
            .fetch(&session.correlator, &session.state, TIMEOUT)
            .await
            .unwrap();

        let tool = catalog.lookup("bare").unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema, json!({"type": "object", "properties": {}}));
    }

    #[tokio::test]
    async fn second_fetch_is_rejected_without_writing() {
        let session = ready_session(social_server).await;
        let catalog = ToolCatalog::new();
        catalog
            .fetch(&session.correlator, &session.state, TIMEOUT)
            .await
            .unwrap();

        let before = session.server.bytes_written();
        let err = catalog
            .fetch(&session.correlator, &session.state, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::CatalogAlreadyLoaded));
        assert_eq!(session.server.bytes_written(), before);
        assert_eq!(catalog.tools().len(), 3);
    }

    #[tokio::test]
    async fn fetch_before_ready_writes_nothing() {
        let (server, events) = ScriptedServer::new(social_server);
        let correlator = RequestCorrelator::new(server.clone(), events);
        let state = SessionStateCell::new();
        let catalog = ToolCatalog::new();

        let err = catalog.fetch(&correlator, &state, TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            McpError::NotReady {
                state: SessionState::Uninitialized
            }
        ));
        assert_eq!(server.bytes_written(), 0);
        assert!(!catalog.is_loaded());
    }

    #[tokio::test]
    async fn missing_tools_array_keeps_session_ready() {
        let session = ready_session(|req| Some(respond(req, json!({"items": []})))).await;
        let catalog = ToolCatalog::new();

        let err = catalog
            .fetch(&session.correlator, &session.state, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
        assert_eq!(session.state.get(), SessionState::Ready);
        assert!(!catalog.is_loaded());
        assert!(catalog.tools().is_empty());
    }

    #[tokio::test]
    async fn duplicate_names_keep_first() {
        let session = ready_session(|req| {
            Some(respond(
                req,
                json!({"tools": [
                    {"name": "dup", "description": "first"},
                    {"name": "dup", "description": "second"},
                    {"description": "no name"}
                ]}),
            ))
        })
        .await;
        let catalog = ToolCatalog::new();
        catalog
            .fetch(&session.correlator, &session.state, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(catalog.tools().len(), 1);
        assert_eq!(catalog.lookup("dup").unwrap().description, "first");
    }

    #[test]
    fn tool_serializes_with_camel_case_schema() {
        let tool = Tool {
            name: "a".to_string(),
            description: "Tool A".to_string(),
            input_schema: json!({"type": "object"}),
        };
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["inputSchema"]["type"], "object");
    }
}
