//! Connection manager error types.

use thiserror::Error;

use super::state::ConnectionState;
use crate::mcp_client::McpError;

/// Why `connect` did not produce a `Ready` connection.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    /// The name is not in the catalog.
    #[error("server '{name}' is not in the catalog")]
    NotFound { name: String },

    /// A live connection for this server already exists.
    #[error("server '{name}' is already connected ({state})")]
    AlreadyConnected {
        name: String,
        state: ConnectionState,
    },

    /// The process or endpoint could not be started.
    #[error("failed to launch server '{name}': {source}")]
    LaunchFailed {
        name: String,
        #[source]
        source: McpError,
    },

    /// The server started but the protocol handshake failed.
    #[error("handshake with server '{name}' failed: {source}")]
    HandshakeFailed {
        name: String,
        #[source]
        source: McpError,
    },

    /// A concurrent `disconnect` tore the connection down mid-connect.
    #[error("connecting to server '{name}' was cancelled by a disconnect")]
    Cancelled { name: String },
}

impl ConnectError {
    /// Server the error refers to.
    pub fn server_name(&self) -> &str {
        match self {
            Self::NotFound { name }
            | Self::AlreadyConnected { name, .. }
            | Self::LaunchFailed { name, .. }
            | Self::HandshakeFailed { name, .. }
            | Self::Cancelled { name } => name,
        }
    }
}
