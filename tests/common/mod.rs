//! Scripted MCP servers for integration tests.
//!
//! A [`FakeConnector`] launches [`FakeTransport`]s from per-server scripts,
//! so tests can make servers hang, crash, fail their handshake or refuse to
//! close without spawning real processes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use mcp_concierge::catalog::{Catalog, LaunchSpec, ServerDescriptor};
use mcp_concierge::config::OrchestratorConfig;
use mcp_concierge::mcp_client::{Connector, McpError, Transport};
use mcp_concierge::recommend::LocalEmbedder;
use mcp_concierge::OrchestrationContext;

// ─── Scripts ─────────────────────────────────────────────────────────────────

/// How a scripted tool answers `tools/call`.
#[derive(Debug, Clone)]
pub enum ToolBehavior {
    /// Reply with one text block.
    Text(String),
    /// Echo the arguments back as text, after an optional delay.
    Echo { delay: Duration },
    /// Never reply.
    Hang,
    /// JSON-RPC error reply.
    RpcError { code: i64, message: String },
    /// Successful reply flagged `isError`.
    ToolError(String),
}

#[derive(Debug, Clone)]
pub struct ToolScript {
    pub name: String,
    pub required: Vec<String>,
    pub behavior: ToolBehavior,
}

impl ToolScript {
    pub fn new(name: &str, behavior: ToolBehavior) -> Self {
        Self {
            name: name.to_string(),
            required: Vec::new(),
            behavior,
        }
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        self.required = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Behaviour of one scripted server.
#[derive(Debug, Clone)]
pub struct ServerScript {
    pub tools: Vec<ToolScript>,
    pub multiplexed: bool,
    pub launch_delay: Duration,
    pub launch_error: Option<String>,
    pub initialize_error: Option<String>,
    pub hang_initialize: bool,
    pub hang_ping: bool,
    pub hang_close: bool,
}

impl ServerScript {
    pub fn with_tools(tools: Vec<ToolScript>) -> Self {
        Self {
            tools,
            multiplexed: true,
            launch_delay: Duration::ZERO,
            launch_error: None,
            initialize_error: None,
            hang_initialize: false,
            hang_ping: false,
            hang_close: false,
        }
    }

    /// `get_current_time` and `convert_time`, like the reference time server.
    pub fn time_server() -> Self {
        Self::with_tools(vec![
            ToolScript::new(
                "get_current_time",
                ToolBehavior::Text("2026-10-19T18:30:00+09:00".to_string()),
            )
            .requiring(&["timezone"]),
            ToolScript::new("convert_time", ToolBehavior::Echo { delay: Duration::ZERO }),
            ToolScript::new("wait_forever", ToolBehavior::Hang),
        ])
    }
}

// ─── Connector ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeConnector {
    scripts: Mutex<HashMap<String, ServerScript>>,
    launched: Mutex<Vec<Arc<FakeTransport>>>,
    launches: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, server: &str, script: ServerScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(server.to_string(), script);
    }

    /// Most recently launched transport for `server`.
    pub fn transport(&self, server: &str) -> Arc<FakeTransport> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.server_name == server)
            .cloned()
            .unwrap_or_else(|| panic!("no transport launched for {server}"))
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn launch(&self, server: &ServerDescriptor) -> Result<Arc<dyn Transport>, McpError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&server.name)
            .cloned()
            .unwrap_or_else(|| ServerScript::with_tools(Vec::new()));

        if !script.launch_delay.is_zero() {
            tokio::time::sleep(script.launch_delay).await;
        }
        if let Some(reason) = &script.launch_error {
            return Err(McpError::SpawnFailed {
                name: server.name.clone(),
                reason: reason.clone(),
            });
        }

        let transport = Arc::new(FakeTransport::new(&server.name, script));
        self.launched.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

pub struct FakeTransport {
    pub server_name: String,
    script: ServerScript,
    lost: watch::Sender<Option<String>>,
    terminated: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeTransport {
    fn new(server_name: &str, script: ServerScript) -> Self {
        let (lost, _) = watch::channel(None);
        Self {
            server_name: server_name.to_string(),
            script,
            lost,
            terminated: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the server process dying.
    pub fn crash(&self, reason: &str) {
        self.mark_lost(reason);
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn is_lost(&self) -> bool {
        self.lost.borrow().is_some()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of `tools/call` requests received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn mark_lost(&self, reason: &str) {
        self.lost.send_if_modified(|lost| {
            if lost.is_none() {
                *lost = Some(reason.to_string());
                true
            } else {
                false
            }
        });
    }

    fn closed_error(&self, reason: String) -> McpError {
        McpError::ConnectionClosed {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn answer(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        match method {
            "initialize" => {
                if self.script.hang_initialize {
                    std::future::pending::<()>().await;
                }
                if let Some(message) = &self.script.initialize_error {
                    return Err(McpError::ServerError {
                        code: -32603,
                        message: message.clone(),
                        data: None,
                    });
                }
                Ok(serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": format!("fake-{}", self.server_name), "version": "1.0.0" },
                }))
            }
            "tools/list" => {
                let tools: Vec<serde_json::Value> = self
                    .script
                    .tools
                    .iter()
                    .map(|tool| {
                        serde_json::json!({
                            "name": tool.name,
                            "description": format!("{} on {}", tool.name, self.server_name),
                            "inputSchema": {
                                "type": "object",
                                "properties": {},
                                "required": tool.required,
                            },
                        })
                    })
                    .collect();
                Ok(serde_json::json!({ "tools": tools }))
            }
            "ping" => {
                if self.script.hang_ping {
                    std::future::pending::<()>().await;
                }
                Ok(serde_json::json!({}))
            }
            "tools/call" => {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                let result = self.call_tool(params.unwrap_or_default()).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            }
            other => Err(McpError::ServerError {
                code: -32601,
                message: format!("method not found: {other}"),
                data: None,
            }),
        }
    }

    async fn call_tool(&self, params: serde_json::Value) -> Result<serde_json::Value, McpError> {
        let name = params["name"].as_str().unwrap_or_default();
        let Some(tool) = self.script.tools.iter().find(|t| t.name == name) else {
            return Err(McpError::ServerError {
                code: -32602,
                message: format!("unknown tool: {name}"),
                data: None,
            });
        };
        let text_reply = |text: String| serde_json::json!({ "content": [{ "type": "text", "text": text }] });

        match &tool.behavior {
            ToolBehavior::Text(text) => Ok(text_reply(text.clone())),
            ToolBehavior::Echo { delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Ok(text_reply(format!("{}:{}", self.server_name, params["arguments"])))
            }
            ToolBehavior::Hang => std::future::pending().await,
            ToolBehavior::RpcError { code, message } => Err(McpError::ServerError {
                code: *code,
                message: message.clone(),
                data: Some(serde_json::json!({ "tool": name })),
            }),
            ToolBehavior::ToolError(text) => Ok(serde_json::json!({
                "content": [{ "type": "text", "text": text }],
                "isError": true,
            })),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn is_multiplexed(&self) -> bool {
        self.script.multiplexed
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let mut lost = self.lost.subscribe();
        let already = lost.borrow().clone();
        if let Some(reason) = already {
            return Err(self.closed_error(reason));
        }
        tokio::select! {
            reply = self.answer(method, params) => reply,
            reason = wait_lost(&mut lost) => Err(self.closed_error(reason)),
        }
    }

    async fn notify(&self, _method: &str, _params: Option<serde_json::Value>) -> Result<(), McpError> {
        let lost = self.lost.borrow().clone();
        match lost {
            Some(reason) => Err(self.closed_error(reason)),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.script.hang_close {
            std::future::pending::<()>().await;
        }
        self.mark_lost("closed");
        Ok(())
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.mark_lost("terminated");
    }

    async fn closed(&self) -> String {
        wait_lost(&mut self.lost.subscribe()).await
    }
}

async fn wait_lost(rx: &mut watch::Receiver<Option<String>>) -> String {
    let reason = match rx.wait_for(Option::is_some).await {
        Ok(reason) => reason.clone().unwrap_or_default(),
        Err(_) => "dropped".to_string(),
    };
    reason
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

pub fn server(name: &str, description: &str) -> ServerDescriptor {
    ServerDescriptor::new(
        name,
        LaunchSpec::from_command_line(&format!("fake-{name}-server")).unwrap(),
        description,
    )
}

/// Config with short timeouts and no background probing.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.catalog.include_builtin = false;
    config.connection.launch_timeout_secs = 2;
    config.connection.handshake_timeout_secs = 1;
    config.connection.shutdown_timeout_secs = 1;
    config.connection.health_check_interval_secs = 0;
    config.connection.health_probe_timeout_secs = 1;
    config.router.call_timeout_ms = 300;
    config
}

/// Context over `catalog`, scripted by `connector`, with the local embedder.
pub async fn context_with(
    config: OrchestratorConfig,
    catalog: Catalog,
    connector: Arc<FakeConnector>,
) -> OrchestrationContext {
    let context = OrchestrationContext::new(
        config,
        catalog,
        Arc::new(LocalEmbedder::default()),
        connector,
    );
    context.init().await;
    context
}

/// The two-server catalog from the time/filesystem scenario.
pub fn scenario_catalog() -> Catalog {
    Catalog::from_descriptors(vec![
        server("time", "current time in any timezone"),
        server("filesystem", "read/write local files"),
    ])
}
