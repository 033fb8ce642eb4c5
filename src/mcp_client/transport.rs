//! Transport abstraction.
//!
//! A [`Transport`] is one live link to one server: correlated request and
//! response, fire-and-forget notifications, graceful close, forced
//! termination, and an asynchronous "connection lost" signal. The connection
//! manager depends only on this trait, never on a concrete wire format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcResponse};
use crate::catalog::ServerDescriptor;

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// A started link to an MCP server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Catalog name of the server on the other end.
    fn server_name(&self) -> &str;

    /// Whether concurrent requests are safe (replies are correlated by id).
    /// When `false` the caller must keep at most one request in flight.
    fn is_multiplexed(&self) -> bool {
        true
    }

    /// Send a request and await its result (or the server's error).
    ///
    /// Has no timeout of its own; dropping the future abandons the request.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError>;

    /// Send a notification (no reply expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<(), McpError>;

    /// Ask the server to shut down and wait until it has. Callers bound this
    /// with a timeout and fall back to [`Transport::terminate`].
    async fn close(&self) -> Result<(), McpError>;

    /// Release the underlying resource immediately.
    async fn terminate(&self);

    /// Resolves, with a reason, once the link is gone for any cause.
    async fn closed(&self) -> String;

    /// Recent diagnostic output (e.g. stderr tail), if any.
    fn diagnostics(&self) -> Option<String> {
        None
    }
}

/// Starts transports from catalog launch specs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn launch(&self, server: &ServerDescriptor) -> Result<Arc<dyn Transport>, McpError>;
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

/// Format a diagnostics suffix for error messages (empty string if none).
pub(crate) fn diagnostics_suffix(transport: &dyn Transport) -> String {
    match transport.diagnostics() {
        Some(text) if !text.trim().is_empty() => format!(" | stderr: {}", text.trim()),
        _ => String::new(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
