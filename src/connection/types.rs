//! Connection manager data types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::ConnectionState;
use crate::config::ConnectionConfig;
use crate::mcp_client::McpToolDefinition;

/// Snapshot of one live connection. Never exposes the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub state: ConnectionState,
    /// Sorted. Empty until the connection is `Ready`.
    pub tool_names: Vec<String>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Name and version the server reported in its handshake.
    pub remote_name: Option<String>,
    pub remote_version: Option<String>,
    /// MCP protocol revision agreed in the handshake.
    pub protocol_version: Option<String>,
}

/// Result of `disconnect`. Disconnecting is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectOutcome {
    /// The connection was torn down; `forced` if graceful close did not finish in time.
    Disconnected { forced: bool },
    /// No live connection existed (or another disconnect was already tearing it down).
    NotConnected,
}

/// Where a tool name currently dispatches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRoute {
    pub server_name: String,
    pub connection_id: u64,
    /// Order in which the connection became `Ready`; higher wins.
    pub ready_seq: u64,
}

/// A tool resolved to the connection that will serve it.
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub route: ToolRoute,
    pub tool: McpToolDefinition,
    /// Other `Ready` servers exposing the same tool name, most recent first.
    pub shadowed: Vec<String>,
}

/// Outcome of resolving a tool on an explicitly named server.
#[derive(Debug, Clone)]
pub enum ServerResolution {
    Found(ResolvedTool),
    /// The server has no `Ready` connection (state if one exists).
    NotReady(Option<ConnectionState>),
    /// The server is `Ready` but does not advertise the tool.
    ToolMissing,
}

/// Lifecycle timeouts.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub launch_timeout: Duration,
    pub handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub health_probe_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            launch_timeout: Duration::from_secs(config.launch_timeout_secs),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            health_probe_timeout: Duration::from_secs(config.health_probe_timeout_secs),
        }
    }
}
