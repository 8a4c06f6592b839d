//! Request/response correlation over a line transport.
//!
//! Each request gets the next id from the pending table and a oneshot slot
//! that the dispatch task fills when the matching response line arrives.

use crate::error::McpError;
use crate::jsonrpc::{Inbound, JsonRpcNotification, JsonRpcRequest};
use crate::supervisor::TransportEvent;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Outbound half of a transport: writes one complete line at a time.
pub trait LineSink: Send + Sync {
    fn send_line(
        &self,
        line: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), McpError>> + Send + '_>>;
}

struct PendingRequest {
    method: String,
    issued_at: Instant,
    deadline: Instant,
    responder: oneshot::Sender<Result<Value, McpError>>,
}

#[derive(Default)]
struct PendingTable {
    next_id: u64,
    entries: HashMap<u64, PendingRequest>,
    closed: bool,
}

/// Matches responses to in-flight requests by id.
pub struct RequestCorrelator {
    sink: Arc<dyn LineSink>,
    table: Arc<Mutex<PendingTable>>,
    dispatcher: JoinHandle<()>,
}

impl RequestCorrelator {
    /// Start correlating: outbound lines go to `sink`, inbound events come from `events`.
    pub fn new(sink: Arc<dyn LineSink>, events: mpsc::Receiver<TransportEvent>) -> Self {
        let table = Arc::new(Mutex::new(PendingTable::default()));
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&table), events));
        Self {
            sink,
            table,
            dispatcher,
        }
    }

    /// Send a request and wait for its response, an error, or the deadline.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let (responder, response) = oneshot::channel();
        let issued_at = Instant::now();
        let deadline = issued_at + timeout;

        // Allocate and register under one lock so the dispatcher never sees
        // a response for an id that is not in the table yet
        let id = {
            let mut table = self.table.lock().await;
            if table.closed {
                return Err(McpError::ProcessExited);
            }
            table.next_id += 1;
            let id = table.next_id;
            table.entries.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    issued_at,
                    deadline,
                    responder,
                },
            );
            id
        };

        let line = match serde_json::to_string(&JsonRpcRequest::new(id, method, params)) {
            Ok(line) => line,
            Err(e) => {
                self.forget(id).await;
                return Err(e.into());
            }
        };

        tracing::debug!(id, method, "sending MCP request");
        if let Err(e) = self.sink.send_line(line).await {
            self.forget(id).await;
            return Err(e);
        }

        match tokio::time::timeout_at(deadline, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ProcessExited),
            Err(_) => {
                self.forget(id).await;
                tracing::warn!(id, method, "MCP request timed out");
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: duration_ms(timeout),
                })
            }
        }
    }

    /// Send a notification. No id is allocated and nothing is awaited.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if self.is_closed().await {
            return Err(McpError::ProcessExited);
        }
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        tracing::debug!(method, "sending MCP notification");
        self.sink.send_line(line).await
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    /// Whether the transport has gone away.
    pub async fn is_closed(&self) -> bool {
        self.table.lock().await.closed
    }

    async fn forget(&self, id: u64) {
        self.table.lock().await.entries.remove(&id);
    }
}

impl Drop for RequestCorrelator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Dispatch task: routes inbound lines to pending requests until the transport ends.
async fn dispatch(table: Arc<Mutex<PendingTable>>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Line(line) => route(&table, &line).await,
            TransportEvent::Exited(exit) => {
                tracing::debug!("transport closed ({exit})");
                break;
            }
        }
    }

    let mut table = table.lock().await;
    table.closed = true;
    let rejected = table.entries.len();
    for (_, entry) in table.entries.drain() {
        let _ = entry.responder.send(Err(McpError::ProcessExited));
    }
    if rejected > 0 {
        tracing::warn!(rejected, "MCP server exited with requests still pending");
    }
}

async fn route(table: &Mutex<PendingTable>, line: &str) {
    let (id, outcome) = match Inbound::parse(line) {
        Ok(Inbound::Response { id, outcome }) => (
            id,
            outcome.map_err(|e| McpError::Remote {
                code: e.code,
                message: e.message,
            }),
        ),
        Ok(Inbound::Invalid { id, reason }) => (id, Err(McpError::Protocol(reason))),
        Ok(Inbound::Unsolicited { method }) => {
            tracing::trace!(?method, "ignoring server-initiated message");
            return;
        }
        Err(e) => {
            tracing::warn!("Ignoring unparseable MCP message: {e}: {line}");
            return;
        }
    };

    let entry = table.lock().await.entries.remove(&id);
    let Some(entry) = entry else {
        tracing::debug!(id, "discarding orphan MCP response");
        return;
    };

    let now = Instant::now();
    if now >= entry.deadline {
        // The caller's timer is about to fire; answer it the same way
        tracing::debug!(id, method = %entry.method, "discarding late MCP response");
        let _ = entry.responder.send(Err(McpError::Timeout {
            timeout_ms: duration_ms(entry.deadline - entry.issued_at),
            method: entry.method,
        }));
        return;
    }

    tracing::debug!(
        id,
        method = %entry.method,
        elapsed_ms = duration_ms(now - entry.issued_at),
        "MCP response received"
    );
    let _ = entry.responder.send(outcome);
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
