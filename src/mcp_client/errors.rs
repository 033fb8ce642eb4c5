//! MCP client error types.

use thiserror::Error;

/// Errors that can occur while talking to an MCP server.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// The server process or endpoint could not be started.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No reply within the allotted time. The transport stays usable.
    #[error("'{method}' on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The connection is gone (process exited, stream closed, session expired).
    #[error("connection to server '{server}' closed: {reason}")]
    ConnectionClosed { server: String, reason: String },
}

impl McpError {
    /// JSON-RPC error code, if the server replied with an error.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the error means the link itself is unusable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }
}
