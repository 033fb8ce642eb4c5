//! Connection lifecycle: launch, handshake, health, teardown.
//!
//! The [`ConnectionManager`] is the single owner of every server connection
//! and the dispatch table built from their tool inventories.

pub mod errors;
pub mod manager;
pub mod state;
pub mod types;

pub use errors::ConnectError;
pub use manager::ConnectionManager;
pub use state::ConnectionState;
pub use types::{
    ConnectionInfo, ConnectionSettings, DisconnectOutcome, ResolvedTool, ServerResolution,
    ToolRoute,
};
