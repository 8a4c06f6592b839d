//! In-memory MCP server double for unit tests.

use crate::correlator::{LineSink, RequestCorrelator};
use crate::error::McpError;
use crate::handshake::{ClientInfo, DEFAULT_INIT_TIMEOUT, ProtocolHandshake, SessionStateCell};
use crate::supervisor::{ProcessExit, TransportEvent};
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Reply = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Records every line written and answers requests with a scripted reply.
pub(crate) struct ScriptedServer {
    written: Mutex<Vec<String>>,
    events: mpsc::Sender<TransportEvent>,
    reply: Reply,
    fail_writes: AtomicBool,
}

impl ScriptedServer {
    pub(crate) fn new<F>(reply: F) -> (Arc<Self>, mpsc::Receiver<TransportEvent>)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        let (events, events_rx) = mpsc::channel(64);
        let server = Arc::new(Self {
            written: Mutex::new(Vec::new()),
            events,
            reply: Box::new(reply),
            fail_writes: AtomicBool::new(false),
        });
        (server, events_rx)
    }

    /// Every message written so far, parsed.
    pub(crate) fn written(&self) -> Vec<Value> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    pub(crate) fn bytes_written(&self) -> usize {
        self.written.lock().unwrap().iter().map(|l| l.len() + 1).sum()
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Push a raw line as if the server had printed it.
    pub(crate) async fn inject(&self, line: &str) {
        self.events
            .send(TransportEvent::Line(line.to_string()))
            .await
            .unwrap();
    }

    pub(crate) async fn exit(&self, code: i32) {
        self.events
            .send(TransportEvent::Exited(ProcessExit {
                code: Some(code),
                signal: None,
            }))
            .await
            .unwrap();
    }
}

impl LineSink for ScriptedServer {
    fn send_line(
        &self,
        line: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), McpError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(McpError::Transport("broken pipe".to_string()));
            }
            let message: Value = serde_json::from_str(&line)?;
            self.written.lock().unwrap().push(line);

            if message.get("id").is_some() {
                if let Some(reply) = (self.reply)(&message) {
                    let _ = self.events.send(TransportEvent::Line(reply.to_string())).await;
                }
            }
            Ok(())
        })
    }
}

/// Build a success response for `request`.
pub(crate) fn respond(request: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
}

/// Replies the way the social tool server does.
pub(crate) fn social_server(request: &Value) -> Option<Value> {
    let result = match request["method"].as_str()? {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "social-mcp-server", "version": "1.0.0"}
        }),
        "tools/list" => json!({
            "tools": [
                {
                    "name": "extract_github_repo_summary",
                    "description": "Extract summary information from a GitHub repository",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"repo_url": {"type": "string"}},
                        "required": ["repo_url"]
                    }
                },
                {
                    "name": "post_to_instagram",
                    "description": "Send a POST request to Instagram API",
                    "inputSchema": {"type": "object"}
                },
                {
                    "name": "explode",
                    "inputSchema": {"type": "object"}
                }
            ]
        }),
        "tools/call" => match request["params"]["name"].as_str()? {
            "extract_github_repo_summary" => json!({
                "content": [{"type": "text", "text": "{\"name\":\"b\"}"}]
            }),
            "explode" => json!({
                "content": [{"type": "text", "text": "boom"}],
                "isError": true
            }),
            _ => json!({"content": []}),
        },
        _ => return None,
    };
    Some(respond(request, result))
}

/// A correlator whose session has already completed the handshake.
pub(crate) struct ReadySession {
    pub(crate) server: Arc<ScriptedServer>,
    pub(crate) correlator: RequestCorrelator,
    pub(crate) state: Arc<SessionStateCell>,
}

/// Handshake against a server that answers `initialize` like the social
/// server and everything else with `reply`.
pub(crate) async fn ready_session<F>(reply: F) -> ReadySession
where
    F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
{
    let (server, events) = ScriptedServer::new(move |req| {
        if req["method"] == "initialize" {
            social_server(req)
        } else {
            reply(req)
        }
    });
    let correlator = RequestCorrelator::new(server.clone(), events);
    let state = Arc::new(SessionStateCell::new());
    ProtocolHandshake::new(Arc::clone(&state), ClientInfo::default())
        .start(&correlator, DEFAULT_INIT_TIMEOUT)
        .await
        .unwrap();
    ReadySession {
        server,
        correlator,
        state,
    }
}
