//! MCP session lifecycle on top of a started transport.
//!
//! `initialize` → `notifications/initialized` → `tools/list` (paginated).
//! Servers that do not implement `tools/list` may carry their tools in the
//! initialize result instead.

use std::collections::HashSet;

use super::errors::McpError;
use super::transport::Transport;
use super::types::{
    error_codes, InitializeResult, McpToolDefinition, ServerInfo, ToolListResult,
    PROTOCOL_VERSION,
};

/// Upper bound on `tools/list` pages, against servers that loop cursors.
const MAX_TOOL_PAGES: usize = 64;

/// What a successful handshake learned about the server.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub server_info: ServerInfo,
    pub protocol_version: String,
    /// Unique by name, in server order.
    pub tools: Vec<McpToolDefinition>,
}

/// Perform the MCP initialization handshake and enumerate tools.
pub async fn handshake(transport: &dyn Transport) -> Result<Handshake, McpError> {
    let server_name = transport.server_name().to_string();
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    });

    let result = transport.request("initialize", Some(params)).await?;
    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.clone(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;

    let tools = match list_tools(transport).await {
        Ok(tools) => tools,
        Err(McpError::ServerError { code, .. }) if code == error_codes::METHOD_NOT_FOUND => {
            tracing::debug!(server = %server_name, "tools/list unsupported, using initialize tools");
            init.tools
        }
        Err(e) => return Err(e),
    };

    let server_info = init.server_info.unwrap_or_default();
    tracing::debug!(
        server = %server_name,
        remote_name = server_info.name.as_deref().unwrap_or("unknown"),
        remote_version = server_info.version.as_deref().unwrap_or("unknown"),
        tools = tools.len(),
        "handshake complete"
    );

    Ok(Handshake {
        server_info,
        protocol_version: init
            .protocol_version
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
        tools: dedupe_tools(&server_name, tools),
    })
}

/// Fetch every page of `tools/list`.
pub async fn list_tools(transport: &dyn Transport) -> Result<Vec<McpToolDefinition>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor
            .as_ref()
            .map(|c| serde_json::json!({ "cursor": c }));
        let result = transport.request("tools/list", params).await?;
        let page: ToolListResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: transport.server_name().to_string(),
                reason: format!("failed to parse tools/list response: {e}"),
            })?;

        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next);
            }
            _ => return Ok(tools),
        }
    }

    tracing::warn!(
        server = %transport.server_name(),
        pages = MAX_TOOL_PAGES,
        "tools/list pagination stopped at page limit"
    );
    Ok(tools)
}

/// Drop nameless tools and repeated names (first definition wins).
fn dedupe_tools(server_name: &str, tools: Vec<McpToolDefinition>) -> Vec<McpToolDefinition> {
    let mut seen = HashSet::new();
    tools
        .into_iter()
        .filter(|tool| {
            if tool.name.trim().is_empty() {
                tracing::warn!(server = %server_name, "ignoring tool without a name");
                return false;
            }
            if !seen.insert(tool.name.clone()) {
                tracing::warn!(server = %server_name, tool = %tool.name, "duplicate tool name ignored");
                return false;
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> McpToolDefinition {
        McpToolDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_dedupe_keeps_first_and_drops_blank_names() {
        let tools = dedupe_tools("s", vec![tool("a"), tool(" "), tool("b"), tool("a")]);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
