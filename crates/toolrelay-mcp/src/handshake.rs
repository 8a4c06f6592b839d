//! MCP session state and the initialize handshake.
//!
//! No request other than `initialize` may reach the server until the
//! handshake has completed and the session is `Ready`.

use crate::correlator::RequestCorrelator;
use crate::error::McpError;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Default bound on the initialize round trip.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of one MCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The single mutable session state, shared with the exit watcher.
#[derive(Debug)]
pub struct SessionStateCell {
    state: Mutex<SessionState>,
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self {
            state: Mutex::new(SessionState::Uninitialized),
        }
    }
}

impl SessionStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move from `from` to `to`; false if the current state is not `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return false;
        }
        tracing::debug!("MCP session {from} -> {to}");
        *state = to;
        true
    }

    /// Close the session from any state. Returns the state it was in.
    pub fn close(&self) -> SessionState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let previous = *state;
        if previous != SessionState::Closed {
            tracing::debug!("MCP session {previous} -> closed");
        }
        *state = SessionState::Closed;
        previous
    }

    /// Gate for every operation other than the handshake itself.
    pub fn ensure_ready(&self) -> Result<(), McpError> {
        match self.get() {
            SessionState::Ready => Ok(()),
            state => Err(McpError::NotReady { state }),
        }
    }
}

/// Identity we announce in `clientInfo`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "toolrelay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server identity reported in the initialize response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// What the server answered to `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

/// Drives the initialize exchange exactly once per session.
pub struct ProtocolHandshake {
    state: Arc<SessionStateCell>,
    client_info: ClientInfo,
}

impl ProtocolHandshake {
    pub fn new(state: Arc<SessionStateCell>, client_info: ClientInfo) -> Self {
        Self { state, client_info }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Perform `initialize` + `notifications/initialized`.
    ///
    /// Only valid from `Uninitialized`. Any failure leaves the session
    /// `Failed` and is returned here, once.
    pub async fn start(
        &self,
        correlator: &RequestCorrelator,
        timeout: Duration,
    ) -> Result<InitializeResult, McpError> {
        if !self
            .state
            .transition(SessionState::Uninitialized, SessionState::Initializing)
        {
            return Err(McpError::InvalidState {
                operation: "start the handshake",
                state: self.state.get(),
            });
        }

        match self.initialize(correlator, timeout).await {
            Ok(result) => {
                if self
                    .state
                    .transition(SessionState::Initializing, SessionState::Ready)
                {
                    Ok(result)
                } else {
                    // Closed underneath us, e.g. the process exited
                    Err(McpError::NotReady {
                        state: self.state.get(),
                    })
                }
            }
            Err(e) => {
                self.state
                    .transition(SessionState::Initializing, SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn initialize(
        &self,
        correlator: &RequestCorrelator,
        timeout: Duration,
    ) -> Result<InitializeResult, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.client_info.name,
                "version": self.client_info.version,
            }
        });

        let result = correlator
            .send("initialize", Some(params), timeout)
            .await?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse initialize result: {e}")))?;

        if !result.protocol_version.is_empty() && result.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                "MCP server negotiated protocol {} (we speak {PROTOCOL_VERSION})",
                result.protocol_version
            );
        }

        correlator
            .notify("notifications/initialized", None)
            .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedServer, social_server};
    use serde_json::json;

    fn handshake() -> ProtocolHandshake {
        ProtocolHandshake::new(Arc::new(SessionStateCell::new()), ClientInfo::default())
    }

    #[tokio::test]
    async fn successful_handshake_reaches_ready() {
        let (server, events) = ScriptedServer::new(social_server);
        let correlator = RequestCorrelator::new(server.clone(), events);
        let handshake = handshake();

        let result = handshake
            .start(&correlator, DEFAULT_INIT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(handshake.state(), SessionState::Ready);
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.unwrap().name, "social-mcp-server");

        let written = server.written();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0]["method"], "initialize");
        assert_eq!(written[0]["params"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(written[0]["params"]["capabilities"], json!({}));
        assert_eq!(written[0]["params"]["clientInfo"]["name"], "toolrelay");
        assert_eq!(written[1]["method"], "notifications/initialized");
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (server, events) = ScriptedServer::new(social_server);
        let correlator = RequestCorrelator::new(server.clone(), events);
        let handshake = handshake();
        handshake
            .start(&correlator, DEFAULT_INIT_TIMEOUT)
            .await
            .unwrap();

        let err = handshake
            .start(&correlator, DEFAULT_INIT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::InvalidState {
                state: SessionState::Ready,
                ..
            }
        ));
        assert_eq!(server.written().len(), 2);
    }

    #[tokio::test]
    async fn remote_error_fails_session() {
        let (server, events) = ScriptedServer::new(|req| {
            Some(json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32602, "message": "Unsupported protocol version"}
            }))
        });
        let correlator = RequestCorrelator::new(server.clone(), events);
        let handshake = handshake();

        let err = handshake
            .start(&correlator, DEFAULT_INIT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Remote { code: -32602, .. }));
        assert_eq!(handshake.state(), SessionState::Failed);
        // No initialized notification after a failed initialize
        assert_eq!(server.written().len(), 1);
    }

    #[tokio::test]
    async fn timeout_fails_session() {
        let (server, events) = ScriptedServer::new(|_| None);
        let correlator = RequestCorrelator::new(server, events);
        let handshake = handshake();

        let err = handshake
            .start(&correlator, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
        assert_eq!(handshake.state(), SessionState::Failed);
    }

    #[test]
    fn ensure_ready_reports_current_state() {
        let cell = SessionStateCell::new();
        match cell.ensure_ready() {
            Err(McpError::NotReady { state }) => assert_eq!(state, SessionState::Uninitialized),
            other => panic!("Expected NotReady, got {other:?}"),
        }
    }

    #[test]
    fn close_is_reachable_from_any_state() {
        let cell = SessionStateCell::new();
        assert!(cell.transition(SessionState::Uninitialized, SessionState::Initializing));
        assert!(cell.transition(SessionState::Initializing, SessionState::Failed));
        assert_eq!(cell.close(), SessionState::Failed);
        assert_eq!(cell.get(), SessionState::Closed);
        assert_eq!(cell.close(), SessionState::Closed);
        assert!(!cell.transition(SessionState::Initializing, SessionState::Ready));
    }

    #[test]
    fn parse_minimal_initialize_result() {
        let result: InitializeResult = serde_json::from_value(json!({})).unwrap();
        assert!(result.protocol_version.is_empty());
        assert!(result.server_info.is_none());
    }
}
