//! ToolRouter: dispatches agent tool calls to live MCP connections.
//!
//! Resolution goes through the connection manager's dispatch table, which
//! prefers the most recently connected server when several expose the same
//! tool name. Callers that need a specific server use explicit routing.
//!
//! The router holds no state between calls.

use std::time::{Duration, Instant};

use crate::connection::manager::CallFailure;
use crate::connection::{ConnectionManager, ResolvedTool, ServerResolution};
use crate::mcp_client::{McpError, McpToolDefinition};

use super::errors::ToolError;
use super::types::{ToolCallRequest, ToolCallResult, ToolDefinition};

/// Maximum number of "did you mean" suggestions on `ToolNotFound`.
const MAX_SUGGESTIONS: usize = 3;

/// Minimum similarity for a tool name to be suggested.
const SUGGESTION_FLOOR: f64 = 0.3;

// ─── ToolRouter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolRouter {
    manager: ConnectionManager,
    call_timeout: Duration,
}

impl ToolRouter {
    pub fn new(manager: ConnectionManager, call_timeout: Duration) -> Self {
        Self {
            manager,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Route a request by its explicit server if set, else by tool name.
    pub async fn invoke(&self, request: &ToolCallRequest) -> Result<ToolCallResult, ToolError> {
        let resolved = match &request.server {
            Some(server) => self.resolve_on(server, &request.tool_name).await?,
            None => self.resolve(&request.tool_name).await?,
        };
        self.dispatch(&request.call_id, resolved, request.arguments.clone())
            .await
    }

    /// Call `tool_name` on whichever `Ready` server currently owns it.
    pub async fn invoke_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        self.invoke(&ToolCallRequest::new(tool_name, arguments)).await
    }

    /// Call `tool_name` on `server_name` specifically.
    pub async fn invoke_on(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        self.invoke(&ToolCallRequest::new(tool_name, arguments).on_server(server_name))
            .await
    }

    /// Dispatch a batch concurrently. Results are in request order.
    pub async fn invoke_all(
        &self,
        requests: &[ToolCallRequest],
    ) -> Vec<Result<ToolCallResult, ToolError>> {
        futures::future::join_all(requests.iter().map(|request| self.invoke(request))).await
    }

    async fn resolve(&self, tool_name: &str) -> Result<ResolvedTool, ToolError> {
        match self.manager.resolve_tool(tool_name).await {
            Some(resolved) => {
                if !resolved.shadowed.is_empty() {
                    tracing::info!(
                        tool = %tool_name,
                        server = %resolved.route.server_name,
                        shadowed = ?resolved.shadowed,
                        "tool exposed by several servers, routing to most recently connected"
                    );
                }
                Ok(resolved)
            }
            None => Err(ToolError::ToolNotFound {
                tool: tool_name.to_string(),
                server: None,
                suggestions: self.suggestions(tool_name).await,
            }),
        }
    }

    async fn resolve_on(&self, server_name: &str, tool_name: &str) -> Result<ResolvedTool, ToolError> {
        match self.manager.resolve_on(server_name, tool_name).await {
            ServerResolution::Found(resolved) => Ok(resolved),
            ServerResolution::NotReady(state) => Err(ToolError::ServerUnavailable {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
                reason: match state {
                    Some(state) => format!("connection is {state}"),
                    None => "server is not connected".to_string(),
                },
            }),
            ServerResolution::ToolMissing => Err(ToolError::ToolNotFound {
                tool: tool_name.to_string(),
                server: Some(server_name.to_string()),
                suggestions: self.suggestions(tool_name).await,
            }),
        }
    }

    async fn dispatch(
        &self,
        call_id: &str,
        resolved: ResolvedTool,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        let server = resolved.route.server_name.clone();
        let tool = resolved.tool.name.clone();
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        validate_arguments(&resolved.tool, &arguments)?;

        tracing::debug!(server = %server, tool = %tool, call_id, "dispatching tool call");
        let start = Instant::now();
        let reply = self
            .manager
            .call_tool(&resolved.route, &tool, arguments, self.call_timeout)
            .await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match reply {
            Ok(result) if result.is_error => {
                let text = result.text();
                Err(ToolError::RemoteError {
                    server: server.clone(),
                    tool: tool.clone(),
                    code: None,
                    message: if text.is_empty() {
                        "tool reported an error".to_string()
                    } else {
                        text
                    },
                    data: result.structured_content,
                })
            }
            Ok(result) => Ok(ToolCallResult {
                call_id: call_id.to_string(),
                server_name: server.clone(),
                tool_name: tool.clone(),
                content: result.content,
                structured_content: result.structured_content,
                execution_time_ms: elapsed_ms,
            }),
            Err(failure) => Err(self.failure_to_error(&server, &tool, failure)),
        };

        match &outcome {
            Ok(_) => tracing::info!(server = %server, tool = %tool, duration_ms = elapsed_ms, "tool call succeeded"),
            Err(e) => tracing::warn!(server = %server, tool = %tool, duration_ms = elapsed_ms, error = %e, "tool call failed"),
        }
        outcome
    }

    fn failure_to_error(&self, server: &str, tool: &str, failure: CallFailure) -> ToolError {
        match failure {
            CallFailure::Unavailable(reason) => ToolError::ServerUnavailable {
                server: server.to_string(),
                tool: tool.to_string(),
                reason,
            },
            CallFailure::TimedOut => ToolError::ToolCallTimeout {
                server: server.to_string(),
                tool: tool.to_string(),
                timeout_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            },
            CallFailure::Rpc(McpError::ServerError {
                code,
                message,
                data,
            }) => ToolError::RemoteError {
                server: server.to_string(),
                tool: tool.to_string(),
                code: Some(code),
                message,
                data,
            },
            CallFailure::Rpc(other) => ToolError::RemoteError {
                server: server.to_string(),
                tool: tool.to_string(),
                code: None,
                message: other.to_string(),
                data: None,
            },
        }
    }

    // ─── Tool surface ───────────────────────────────────────────────────

    /// Every routable tool with the server a bare-name call reaches.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.manager
            .resolved_tools()
            .await
            .into_iter()
            .map(|resolved| ToolDefinition {
                name: resolved.tool.name,
                server_name: resolved.route.server_name,
                description: resolved.tool.description,
                input_schema: resolved.tool.input_schema,
                shadowed: resolved.shadowed,
            })
            .collect()
    }

    /// The merged toolset in OpenAI function-calling format.
    pub async fn to_openai_tools(&self) -> Vec<serde_json::Value> {
        self.tool_definitions()
            .await
            .iter()
            .map(ToolDefinition::to_openai_tool)
            .collect()
    }

    async fn suggestions(&self, tool_name: &str) -> Vec<String> {
        find_similar(&self.manager.tool_names().await, tool_name, MAX_SUGGESTIONS)
    }
}

// ─── Validation ─────────────────────────────────────────────────────────────

/// Check `arguments` against the `required` list of the tool's input schema.
///
/// Only presence is checked; value types are left to the server.
pub fn validate_arguments(
    tool: &McpToolDefinition,
    arguments: &serde_json::Value,
) -> Result<(), ToolError> {
    let Some(args) = arguments.as_object() else {
        return Err(ToolError::InvalidArguments {
            tool: tool.name.clone(),
            reason: "arguments must be a JSON object".to_string(),
        });
    };

    let required = tool
        .input_schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();

    let missing: Vec<&str> = required
        .into_iter()
        .filter(|field| !args.contains_key(*field))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments {
            tool: tool.name.clone(),
            reason: format!("missing required field(s): {}", missing.join(", ")),
        })
    }
}

// ─── Suggestions ────────────────────────────────────────────────────────────

/// Names in `candidates` most similar to `name`, best first.
pub(crate) fn find_similar(candidates: &[String], name: &str, max_results: usize) -> Vec<String> {
    let query = name.to_lowercase();
    let mut scored: Vec<(&String, f64)> = candidates
        .iter()
        .map(|candidate| (candidate, similarity(&query, &candidate.to_lowercase())))
        .filter(|(_, score)| *score > SUGGESTION_FLOOR)
        .collect();

    // Stable: equal scores keep the (sorted) candidate order.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(max_results)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Levenshtein edit distance over chars, single-row DP.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 1.0 for identical strings, 0.0 for nothing in common.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
