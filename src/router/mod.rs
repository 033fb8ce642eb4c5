//! Tool routing: resolve an agent tool call to its live connection and
//! dispatch it.

pub mod errors;
pub mod tool_router;
pub mod types;

pub use errors::ToolError;
pub use tool_router::{validate_arguments, ToolRouter};
pub use types::{ToolCallRequest, ToolCallResult, ToolDefinition};
