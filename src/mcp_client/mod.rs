//! MCP client: JSON-RPC 2.0 transports and the protocol handshake.
//!
//! This module handles:
//! - The [`Transport`] / [`Connector`] seam the connection manager builds on
//! - JSON-RPC over child-process stdio, with concurrent correlated requests
//! - MCP streamable HTTP for remote servers
//! - The `initialize` handshake and paginated tool discovery

pub mod connector;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod stdio;
pub mod transport;
pub mod types;

pub use connector::McpConnector;
pub use errors::McpError;
pub use lifecycle::{handshake, Handshake};
pub use stdio::StdioTransport;
pub use transport::{Connector, Transport};
pub use types::{CallToolResult, McpToolDefinition, ServerInfo};
