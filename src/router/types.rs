//! Tool call request/result types exchanged with the agent loop.

use serde::{Deserialize, Serialize};

use crate::mcp_client::types::content_text;

/// A tool call issued by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Caller-assigned id echoed for correlation (e.g. the model's tool call id).
    #[serde(default)]
    pub call_id: String,
    pub tool_name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: serde_json::Value,
    /// Route to this server explicitly instead of by tool name alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

fn empty_arguments() -> serde_json::Value {
    serde_json::json!({})
}

impl ToolCallRequest {
    pub fn new(tool_name: &str, arguments: serde_json::Value) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.to_string(),
            arguments,
            server: None,
        }
    }

    /// Address the call to `(server, tool)`.
    pub fn on_server(mut self, server: &str) -> Self {
        self.server = Some(server.to_string());
        self
    }
}

/// Successful tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub server_name: String,
    pub tool_name: String,
    /// MCP content blocks, unchanged.
    pub content: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    pub execution_time_ms: u64,
}

impl ToolCallResult {
    /// Text blocks joined with newlines.
    pub fn text(&self) -> String {
        content_text(&self.content)
    }

    /// Text to fold back into the conversation, at most `max_bytes` long.
    ///
    /// Falls back to the structured content, then the raw content array,
    /// when the result carries no text blocks.
    pub fn render_for_conversation(&self, max_bytes: usize) -> String {
        let text = self.text();
        let rendered = if !text.is_empty() {
            text
        } else if let Some(structured) = &self.structured_content {
            structured.to_string()
        } else if !self.content.is_empty() {
            serde_json::Value::Array(self.content.clone()).to_string()
        } else {
            return "(no output)".to_string();
        };

        if rendered.len() <= max_bytes {
            return rendered;
        }
        const MARKER: &str = "\n[... output truncated]";
        let keep = max_bytes.saturating_sub(MARKER.len());
        format!("{}{MARKER}", truncate_utf8(&rendered, keep))
    }
}

/// A routable tool as presented to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    /// Server a call by bare name dispatches to.
    pub server_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Other connected servers exposing the same name, reachable only by
    /// explicit routing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shadowed: Vec<String>,
}

impl ToolDefinition {
    /// OpenAI function-calling entry.
    pub fn to_openai_tool(&self) -> serde_json::Value {
        let parameters = if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            serde_json::json!({ "type": "object", "properties": {} })
        };
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": parameters,
            }
        })
    }
}

/// Longest prefix of `s` within `max_bytes` that ends on a char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
