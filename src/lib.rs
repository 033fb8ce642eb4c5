//! MCP Concierge: recommend, connect and route tool calls across MCP servers.
//!
//! The agent loop talks to an [`OrchestrationContext`] and one [`Session`]
//! per conversation:
//!
//! - [`recommend`](orchestrator::Session::recommend) ranks catalog servers for
//!   a natural-language request
//! - [`connect`](orchestrator::Session::connect) launches a server and merges
//!   its tools into the session's toolset
//! - [`invoke_tool`](orchestrator::Session::invoke_tool) routes a tool call to
//!   the live connection that owns it

pub mod catalog;
pub mod config;
pub mod connection;
pub mod mcp_client;
pub mod orchestrator;
pub mod recommend;
pub mod router;
pub mod telemetry;

pub use catalog::{Catalog, LaunchSpec, ServerDescriptor};
pub use config::OrchestratorConfig;
pub use connection::{ConnectError, ConnectionInfo, ConnectionState, DisconnectOutcome};
pub use orchestrator::{OrchestrationContext, OrchestratorError, Session};
pub use recommend::Recommendation;
pub use router::{ToolCallRequest, ToolCallResult, ToolDefinition, ToolError};
