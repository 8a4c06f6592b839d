//! MCP (Model Context Protocol) client implementation for toolrelay.
//!
//! Talks to a stdio MCP server that exchanges newline-delimited JSON-RPC 2.0
//! messages. The server is spawned as a child process, initialized with a
//! handshake, and its tools are discovered once and then called by name.

pub mod catalog;
pub mod config;
pub mod correlator;
pub mod error;
pub mod framer;
pub mod handshake;
pub mod invoker;
pub mod jsonrpc;
pub mod session;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use catalog::{Tool, ToolCatalog};
pub use config::McpServerConfig;
pub use correlator::{LineSink, RequestCorrelator};
pub use error::McpError;
pub use handshake::{ClientInfo, InitializeResult, ServerInfo, SessionState};
pub use invoker::{ToolCallResult, ToolContent};
pub use session::McpSession;
pub use supervisor::{ProcessExit, ProcessSupervisor, TransportEvent};
