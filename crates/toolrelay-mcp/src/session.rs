//! One MCP server process, handshaken and ready for tool calls.
//!
//! This is the surface the rest of the application uses: start a session,
//! list its tools, call them, close it.

use crate::catalog::{Tool, ToolCatalog};
use crate::config::McpServerConfig;
use crate::correlator::RequestCorrelator;
use crate::error::McpError;
use crate::handshake::{ClientInfo, ProtocolHandshake, ServerInfo, SessionState, SessionStateCell};
use crate::invoker::{ToolCallResult, ToolInvoker};
use crate::supervisor::{ProcessExit, ProcessSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// How long a closing server gets to exit on stdin EOF before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A live connection to one MCP server.
pub struct McpSession {
    id: Uuid,
    name: String,
    config: McpServerConfig,
    supervisor: Arc<ProcessSupervisor>,
    correlator: RequestCorrelator,
    state: Arc<SessionStateCell>,
    catalog: ToolCatalog,
    server_info: Option<ServerInfo>,
    protocol_version: String,
}

impl McpSession {
    /// Spawn the server, complete the handshake, and discover its tools.
    ///
    /// A handshake failure is fatal: the process is shut down and the error
    /// returned. A failed tool discovery is only logged; the session stays
    /// usable and discovery can be retried with [`McpSession::discover_tools`].
    pub async fn start(name: impl Into<String>, config: &McpServerConfig) -> Result<Self, McpError> {
        Self::start_with_client(name, config, ClientInfo::default()).await
    }

    /// Like [`McpSession::start`], announcing a custom client identity.
    pub async fn start_with_client(
        name: impl Into<String>,
        config: &McpServerConfig,
        client_info: ClientInfo,
    ) -> Result<Self, McpError> {
        let name = name.into();
        let id = Uuid::new_v4();
        let span = tracing::info_span!("mcp_session", server = %name, session_id = %id);

        async move {
            let (supervisor, events) =
                ProcessSupervisor::start(&config.command, &config.args, &config.env)?;
            let supervisor = Arc::new(supervisor);

            let state = Arc::new(SessionStateCell::new());
            let exit_state = Arc::clone(&state);
            let exit_server = name.clone();
            supervisor.on_exit(move |exit| {
                if exit_state.close() != SessionState::Closed {
                    tracing::warn!("MCP server '{exit_server}' exited unexpectedly ({exit})");
                }
            });

            let correlator = RequestCorrelator::new(supervisor.clone(), events);
            let handshake = ProtocolHandshake::new(Arc::clone(&state), client_info);

            let init = match handshake.start(&correlator, config.init_timeout()).await {
                Ok(init) => init,
                Err(e) => {
                    tracing::warn!("MCP handshake with '{name}' failed: {e}");
                    supervisor.terminate(SHUTDOWN_GRACE).await;
                    return Err(e);
                }
            };

            let session = Self {
                id,
                name,
                config: config.clone(),
                supervisor,
                correlator,
                state,
                catalog: ToolCatalog::new(),
                server_info: init.server_info,
                protocol_version: init.protocol_version,
            };

            if let Err(e) = session.discover_tools().await {
                tracing::warn!("Tool discovery on '{}' failed: {e}", session.name);
            }

            tracing::info!(
                "MCP server '{}' connected with {} tools",
                session.name,
                session.catalog.tools().len()
            );
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Fetch the tool catalog. Only needed if discovery failed during start.
    pub async fn discover_tools(&self) -> Result<&[Tool], McpError> {
        self.catalog
            .fetch(&self.correlator, &self.state, self.config.timeout())
            .await
    }

    /// The tools this server offers.
    pub fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        self.state.ensure_ready()?;
        Ok(self.catalog.tools().to_vec())
    }

    /// Look up one tool by name.
    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.catalog.lookup(name)
    }

    /// Call a tool and return the text of its first content item.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        self.invoker()
            .call(name, arguments)
            .instrument(tracing::debug_span!("mcp_call", session_id = %self.id, tool = name))
            .await
    }

    /// Call a tool and return its full result, including non-text content.
    pub async fn call_tool_raw(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        self.invoker().call_raw(name, arguments).await
    }

    fn invoker(&self) -> ToolInvoker<'_> {
        ToolInvoker::new(
            &self.correlator,
            &self.catalog,
            &self.state,
            self.config.timeout(),
        )
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn server_name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }

    /// Server identity from the handshake, if the server sent one.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Requests currently waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.correlator.pending_count().await
    }

    /// How the server process ended, once it has.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.supervisor.exit_status()
    }

    /// Close the session and shut the server down. Safe to call repeatedly.
    pub async fn close(&self) -> Option<ProcessExit> {
        self.state.close();
        self.supervisor.terminate(SHUTDOWN_GRACE).await
    }
}
