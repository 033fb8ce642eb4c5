//! Tool router error types.

use thiserror::Error;

/// Why a tool call produced no result.
///
/// Every variant names the tool, and the server wherever one was resolved,
/// so the error renders as a complete message on its own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// No `Ready` connection advertises the tool.
    #[error("{}", tool_not_found_message(.tool, .server, .suggestions))]
    ToolNotFound {
        tool: String,
        /// Set when the call addressed one server explicitly.
        server: Option<String>,
        /// Similar routable tool names, best first.
        suggestions: Vec<String>,
    },

    /// The connection left `Ready` between resolution and reply.
    #[error("server '{server}' is unavailable for tool '{tool}': {reason}")]
    ServerUnavailable {
        server: String,
        tool: String,
        reason: String,
    },

    /// No reply within the per-call timeout. The connection stays `Ready`.
    #[error("tool '{tool}' on server '{server}' timed out after {timeout_ms}ms")]
    ToolCallTimeout {
        server: String,
        tool: String,
        timeout_ms: u64,
    },

    /// The server reported an error, passed through unchanged.
    #[error("server '{server}' reported an error for tool '{tool}': {message}")]
    RemoteError {
        server: String,
        tool: String,
        /// JSON-RPC error code; `None` for an `isError` tool result.
        code: Option<i64>,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Arguments are missing fields the tool's input schema requires.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

impl ToolError {
    /// Whether the same call may reasonably be retried as is.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ToolCallTimeout { .. })
    }

    /// Server the failure is attributed to, if one was resolved.
    pub fn server_name(&self) -> Option<&str> {
        match self {
            Self::ToolNotFound { server, .. } => server.as_deref(),
            Self::ServerUnavailable { server, .. }
            | Self::ToolCallTimeout { server, .. }
            | Self::RemoteError { server, .. } => Some(server),
            Self::InvalidArguments { .. } => None,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::ToolNotFound { tool, .. }
            | Self::ServerUnavailable { tool, .. }
            | Self::ToolCallTimeout { tool, .. }
            | Self::RemoteError { tool, .. }
            | Self::InvalidArguments { tool, .. } => tool,
        }
    }
}

fn tool_not_found_message(tool: &str, server: &Option<String>, suggestions: &[String]) -> String {
    let mut message = match server {
        Some(server) => format!("tool '{tool}' not found on server '{server}'"),
        None => format!("tool '{tool}' not found on any connected server"),
    };
    if !suggestions.is_empty() {
        message.push_str(&format!("; did you mean: {}?", suggestions.join(", ")));
    }
    message
}
