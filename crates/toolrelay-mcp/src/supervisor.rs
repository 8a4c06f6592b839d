//! Stdio process supervision for MCP servers.
//!
//! Spawns a child process and owns it for its whole lifetime: a writer task
//! feeds newline-terminated messages into stdin, a reader task frames stdout
//! into lines, a stderr task forwards diagnostics to the log, and a monitor
//! task waits for the process to exit.

use crate::correlator::LineSink;
use crate::error::McpError;
use crate::framer::LineFramer;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// How long stdout may keep draining after the process has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// How long to wait for the process to die after a kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// How the child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Everything the supervisor reports upward, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One complete line from stdout.
    Line(String),
    /// The process is gone and stdout has drained. Sent exactly once, last.
    Exited(ProcessExit),
}

struct WriteRequest {
    line: String,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Owns one MCP server process.
pub struct ProcessSupervisor {
    command: String,
    write_tx: Mutex<Option<mpsc::Sender<WriteRequest>>>,
    exited: Arc<AtomicBool>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    kill: CancellationToken,
}

impl ProcessSupervisor {
    /// Spawn a child process and start the background tasks.
    ///
    /// Returns the supervisor together with the stream of inbound events.
    pub fn start(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

        let (stdin, stdout, stderr) = match (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.start_kill();
                return Err(McpError::Spawn {
                    command: command.to_string(),
                    source: std::io::Error::other("failed to capture stdio pipes"),
                });
            }
        };

        tracing::debug!(server = %command, pid = ?child.id(), "spawned MCP server");

        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);
        let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(64);
        let (exit_tx, exit_rx) = watch::channel(None);
        let exited = Arc::new(AtomicBool::new(false));
        let kill = CancellationToken::new();

        tokio::spawn(write_loop(stdin, write_rx));
        tokio::spawn(log_stderr(command.to_string(), stderr));
        let reader = tokio::spawn(read_loop(command.to_string(), stdout, event_tx.clone()));

        // Monitor task: owns the child until it exits or is killed
        let monitor_exited = Arc::clone(&exited);
        let monitor_kill = kill.clone();
        let server = command.to_string();
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = monitor_kill.cancelled() => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => ProcessExit::from(status),
                Err(e) => {
                    tracing::warn!(server = %server, "Failed to wait for MCP server: {e}");
                    ProcessExit {
                        code: None,
                        signal: None,
                    }
                }
            };

            // Let responses already written to the pipe reach the reader
            let mut reader = reader;
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }

            tracing::info!(server = %server, "MCP server exited ({exit})");
            monitor_exited.store(true, Ordering::SeqCst);
            exit_tx.send_replace(Some(exit));
            let _ = event_tx.send(TransportEvent::Exited(exit)).await;
        });

        Ok((
            Self {
                command: command.to_string(),
                write_tx: Mutex::new(Some(write_tx)),
                exited,
                exit_rx,
                kill,
            },
            event_rx,
        ))
    }

    /// The command this supervisor spawned.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Write exactly one newline-terminated message to the server's stdin.
    pub async fn write(&self, line: String) -> Result<(), McpError> {
        if line.contains('\n') {
            return Err(McpError::Transport(
                "message contains an embedded newline".to_string(),
            ));
        }
        if self.exited.load(Ordering::SeqCst) {
            return Err(McpError::Transport(format!(
                "MCP server '{}' has exited",
                self.command
            )));
        }

        let sender = self
            .write_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| McpError::Transport("stdin has been closed".to_string()))?;

        let (done, done_rx) = oneshot::channel();
        sender
            .send(WriteRequest { line, done })
            .await
            .map_err(|_| McpError::Transport("stdin writer has stopped".to_string()))?;

        match done_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(McpError::Transport(format!("write to stdin failed: {e}"))),
            Err(_) => Err(McpError::Transport("stdin writer has stopped".to_string())),
        }
    }

    /// Register a callback for process exit. Invoked at most once.
    pub fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce(ProcessExit) + Send + 'static,
    {
        let mut exit_rx = self.exit_rx.clone();
        tokio::spawn(async move {
            let exit = match exit_rx.wait_for(Option::is_some).await {
                Ok(exit) => *exit,
                Err(_) => None,
            };
            if let Some(exit) = exit {
                callback(exit);
            }
        });
    }

    /// The exit status, once the process is gone.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    /// Shut the process down: close stdin, wait briefly, then kill.
    ///
    /// Safe to call repeatedly and after the process has already exited.
    pub async fn terminate(&self, grace: Duration) -> Option<ProcessExit> {
        // Dropping the sender ends the writer task, which closes stdin
        self.write_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(exit) = self.wait_for_exit(grace).await {
            return Some(exit);
        }

        tracing::debug!(server = %self.command, "MCP server ignored stdin EOF, killing");
        self.kill.cancel();
        self.wait_for_exit(KILL_WAIT).await
    }

    async fn wait_for_exit(&self, limit: Duration) -> Option<ProcessExit> {
        let mut exit_rx = self.exit_rx.clone();
        match tokio::time::timeout(limit, exit_rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            _ => None,
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

impl LineSink for ProcessSupervisor {
    fn send_line(
        &self,
        line: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), McpError>> + Send + '_>> {
        Box::pin(self.write(line))
    }
}

/// Writer task: drains the channel and writes each message as one buffer.
async fn write_loop(mut stdin: ChildStdin, mut write_rx: mpsc::Receiver<WriteRequest>) {
    while let Some(WriteRequest { line, done }) = write_rx.recv().await {
        let mut buf = line.into_bytes();
        buf.push(b'\n');

        let result = match stdin.write_all(&buf).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        let failed = result.is_err();
        let _ = done.send(result);
        if failed {
            break;
        }
    }
}

/// Reader task: frames stdout into lines and forwards them in order.
async fn read_loop<R>(server: String, mut stdout: R, event_tx: mpsc::Sender<TransportEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(server = %server, "Failed to read MCP server stdout: {e}");
                break;
            }
        };
        for line in framer.feed(&chunk[..n]) {
            if event_tx.send(TransportEvent::Line(line)).await.is_err() {
                return;
            }
        }
    }

    if let Some(tail) = framer.finish() {
        tracing::warn!(server = %server, "Dropping unterminated output at EOF: {tail}");
    }
}

/// Stderr task: server diagnostics go to the log, never to the protocol.
async fn log_stderr<R>(server: String, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::debug!(server = %server, "stderr: {line}");
        }
    }
}
