//! Model Context Protocol client.
//!
//! Connects to external tool servers over stdio or streamable HTTP, lists
//! their tools, and registers each one as `mcp__<server>__<tool>`.

pub mod client;
pub mod manager;
pub mod protocol;
pub mod tool;
pub mod transport;

pub use client::McpClient;
pub use manager::McpManager;
pub use tool::{McpTool, qualified_name};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("MCP I/O error: {0}")]
    Io(String),

    #[error("MCP HTTP error: {0}")]
    Http(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("MCP request '{method}' timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("MCP connection closed")]
    ConnectionClosed,

    #[error("Unsupported MCP transport: {0}")]
    UnsupportedTransport(String),

    #[error("Invalid MCP server config: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        McpError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Protocol(e.to_string())
    }
}
