//! Connection manager: owns every live connection and its transport.
//!
//! All reads and writes of the live set go through one `RwLock`. Transports
//! never leave this module; callers get [`ConnectionInfo`] snapshots and
//! [`ToolRoute`]s, and dispatch through [`ConnectionManager::call_tool`].
//!
//! Each connection publishes its state on a `watch` channel. In-flight calls
//! watch it so a disconnect or crash fails them immediately, and a monitor
//! task turns the transport's "connection lost" signal into `Failed`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::errors::ConnectError;
use super::state::ConnectionState;
use super::types::{
    ConnectionInfo, ConnectionSettings, DisconnectOutcome, ResolvedTool, ServerResolution,
    ToolRoute,
};
use crate::catalog::{ServerDescriptor, SharedCatalog};
use crate::mcp_client::lifecycle::{handshake, Handshake};
use crate::mcp_client::transport::diagnostics_suffix;
use crate::mcp_client::{CallToolResult, Connector, McpError, McpToolDefinition, ServerInfo, Transport};

// ─── Call failures ───────────────────────────────────────────────────────────

/// Why a dispatched call did not produce a result. Mapped to `ToolError` by
/// the router, which knows the tool name.
#[derive(Debug, Clone)]
pub(crate) enum CallFailure {
    /// The connection left `Ready` before or during the call.
    Unavailable(String),
    /// No reply within the per-call timeout. The connection stays `Ready`.
    TimedOut,
    /// The server answered with a JSON-RPC error (or garbage).
    Rpc(McpError),
}

// ─── Internal state ──────────────────────────────────────────────────────────

struct Connection {
    id: u64,
    server_name: String,
    state_tx: watch::Sender<ConnectionState>,
    tools: BTreeMap<String, McpToolDefinition>,
    transport: Option<Arc<dyn Transport>>,
    /// Serialises calls when the transport cannot multiplex.
    call_gate: Arc<Mutex<()>>,
    ready_seq: u64,
    connected_at: Option<DateTime<Utc>>,
    server_info: ServerInfo,
    protocol_version: Option<String>,
    monitor: Option<JoinHandle<()>>,
}

impl Connection {
    fn launching(id: u64, server_name: &str) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Launching);
        Self {
            id,
            server_name: server_name.to_string(),
            state_tx,
            tools: BTreeMap::new(),
            transport: None,
            call_gate: Arc::new(Mutex::new(())),
            ready_seq: 0,
            connected_at: None,
            server_info: ServerInfo::default(),
            protocol_version: None,
            monitor: None,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Apply a transition if it is legal. Returns whether it happened.
    fn transition(&self, next: ConnectionState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            tracing::debug!(server = %self.server_name, from = %current, to = %next, "ignored illegal transition");
            return false;
        }
        self.state_tx.send_replace(next);
        tracing::debug!(server = %self.server_name, from = %current, to = %next, "connection state changed");
        true
    }

    fn info(&self) -> ConnectionInfo {
        let ready = self.state() == ConnectionState::Ready;
        ConnectionInfo {
            server_name: self.server_name.clone(),
            state: self.state(),
            tool_names: if ready {
                self.tools.keys().cloned().collect()
            } else {
                Vec::new()
            },
            connected_at: self.connected_at,
            remote_name: self.server_info.name.clone(),
            remote_version: self.server_info.version.clone(),
            protocol_version: self.protocol_version.clone(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

#[derive(Default)]
struct LiveSet {
    /// lowercase server name → connection.
    connections: HashMap<String, Connection>,
    /// tool name → routes, most recently `Ready` first.
    routes: HashMap<String, Vec<ToolRoute>>,
}

impl LiveSet {
    /// Current connection for `key` if it is still the one with `id`.
    fn current(&self, key: &str, id: u64) -> Option<&Connection> {
        self.connections.get(key).filter(|c| c.id == id)
    }

    fn rebuild_routes(&mut self) {
        let mut routes: HashMap<String, Vec<ToolRoute>> = HashMap::new();
        for conn in self
            .connections
            .values()
            .filter(|c| c.state() == ConnectionState::Ready)
        {
            for tool in conn.tools.keys() {
                routes.entry(tool.clone()).or_default().push(ToolRoute {
                    server_name: conn.server_name.clone(),
                    connection_id: conn.id,
                    ready_seq: conn.ready_seq,
                });
            }
        }
        for candidates in routes.values_mut() {
            candidates.sort_by(|a, b| b.ready_seq.cmp(&a.ready_seq));
        }
        self.routes = routes;
    }

    fn resolve(&self, tool_name: &str, route: &ToolRoute) -> Option<ResolvedTool> {
        let conn = self.current(&key_of(&route.server_name), route.connection_id)?;
        let tool = conn.tools.get(tool_name)?.clone();
        let shadowed = self
            .routes
            .get(tool_name)
            .map(|all| {
                all.iter()
                    .filter(|r| r.connection_id != route.connection_id)
                    .map(|r| r.server_name.clone())
                    .collect()
            })
            .unwrap_or_default();
        Some(ResolvedTool {
            route: route.clone(),
            tool,
            shadowed,
        })
    }
}

struct Inner {
    catalog: SharedCatalog,
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    live: RwLock<LiveSet>,
    next_id: AtomicU64,
    next_ready_seq: AtomicU64,
}

fn key_of(name: &str) -> String {
    name.trim().to_lowercase()
}

// ─── ConnectionManager ───────────────────────────────────────────────────────

/// Owns zero or more server connections. Cheap to clone (shared state).
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        catalog: SharedCatalog,
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                connector,
                settings,
                live: RwLock::new(LiveSet::default()),
                next_id: AtomicU64::new(1),
                next_ready_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Launch, handshake, and register a catalog server.
    ///
    /// On any failure the partially acquired transport is released and no
    /// entry is left behind.
    pub async fn connect(&self, name: &str) -> Result<ConnectionInfo, ConnectError> {
        let descriptor = self
            .inner
            .catalog
            .get(name)
            .ok_or_else(|| ConnectError::NotFound {
                name: name.trim().to_string(),
            })?;
        let key = key_of(&descriptor.name);

        let (id, state_rx) = {
            let mut live = self.inner.live.write().await;
            if let Some(existing) = live.connections.get(&key) {
                return Err(ConnectError::AlreadyConnected {
                    name: existing.server_name.clone(),
                    state: existing.state(),
                });
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let conn = Connection::launching(id, &descriptor.name);
            let state_rx = conn.state_tx.subscribe();
            live.connections.insert(key.clone(), conn);
            (id, state_rx)
        };

        tracing::info!(server = %descriptor.name, launch = %descriptor.launch, "connecting to server");

        let mut pending = PendingConnect {
            inner: self.inner.clone(),
            key,
            id,
            armed: true,
        };
        let result = self
            .inner
            .establish(&descriptor, &pending.key, id, state_rx)
            .await;
        pending.armed = false;

        match &result {
            Ok(info) => tracing::info!(
                server = %info.server_name,
                tools = info.tool_names.len(),
                "server ready"
            ),
            Err(e) => tracing::warn!(server = %descriptor.name, error = %e, "connect failed"),
        }
        result
    }

    /// Tear down the connection for `name`.
    ///
    /// Graceful close first, bounded by the shutdown timeout, then forced
    /// termination. Never fails: an absent connection is `NotConnected`.
    pub async fn disconnect(&self, name: &str) -> DisconnectOutcome {
        self.inner.disconnect(name).await
    }

    /// Disconnect every connection concurrently.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = {
            let live = self.inner.live.read().await;
            live.connections
                .values()
                .map(|c| c.server_name.clone())
                .collect()
        };
        futures::future::join_all(names.iter().map(|name| self.inner.disconnect(name))).await;
    }

    /// Snapshot of every live connection, sorted by server name.
    pub async fn list_connected(&self) -> Vec<ConnectionInfo> {
        let live = self.inner.live.read().await;
        let mut infos: Vec<ConnectionInfo> = live
            .connections
            .values()
            .filter(|c| c.state().is_live())
            .map(Connection::info)
            .collect();
        infos.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        infos
    }

    /// State of the connection for `name`, if one exists.
    pub async fn state_of(&self, name: &str) -> Option<ConnectionState> {
        let live = self.inner.live.read().await;
        live.connections.get(&key_of(name)).map(Connection::state)
    }

    /// Resolve a tool name to the most recently connected `Ready` server
    /// advertising it.
    pub async fn resolve_tool(&self, tool_name: &str) -> Option<ResolvedTool> {
        let live = self.inner.live.read().await;
        let route = live.routes.get(tool_name)?.first()?;
        live.resolve(tool_name, route)
    }

    /// Resolve a tool on one specific server.
    pub async fn resolve_on(&self, server_name: &str, tool_name: &str) -> ServerResolution {
        let live = self.inner.live.read().await;
        let Some(conn) = live.connections.get(&key_of(server_name)) else {
            return ServerResolution::NotReady(None);
        };
        if conn.state() != ConnectionState::Ready {
            return ServerResolution::NotReady(Some(conn.state()));
        }
        let route = ToolRoute {
            server_name: conn.server_name.clone(),
            connection_id: conn.id,
            ready_seq: conn.ready_seq,
        };
        match live.resolve(tool_name, &route) {
            Some(resolved) => ServerResolution::Found(resolved),
            None => ServerResolution::ToolMissing,
        }
    }

    /// All tool names currently routable.
    pub async fn tool_names(&self) -> Vec<String> {
        let live = self.inner.live.read().await;
        let mut names: Vec<String> = live.routes.keys().cloned().collect();
        names.sort();
        names
    }

    /// The winning resolution of every routable tool name, sorted by name.
    pub async fn resolved_tools(&self) -> Vec<ResolvedTool> {
        let live = self.inner.live.read().await;
        let mut names: Vec<&String> = live.routes.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| {
                let route = live.routes.get(name)?.first()?;
                live.resolve(name, route)
            })
            .collect()
    }

    /// Dispatch `tools/call` over the routed connection.
    ///
    /// Fails fast with `Unavailable` if the connection leaves `Ready` while
    /// the call is in flight; a timeout leaves the connection untouched.
    pub(crate) async fn call_tool(
        &self,
        route: &ToolRoute,
        tool_name: &str,
        arguments: serde_json::Value,
        call_timeout: Duration,
    ) -> Result<CallToolResult, CallFailure> {
        let (transport, gate, mut state_rx) = {
            let live = self.inner.live.read().await;
            let conn = live
                .current(&key_of(&route.server_name), route.connection_id)
                .ok_or_else(|| CallFailure::Unavailable("connection no longer exists".into()))?;
            if conn.state() != ConnectionState::Ready {
                return Err(CallFailure::Unavailable(format!("connection is {}", conn.state())));
            }
            let transport = conn
                .transport
                .clone()
                .ok_or_else(|| CallFailure::Unavailable("connection has no transport".into()))?;
            (transport, conn.call_gate.clone(), conn.state_tx.subscribe())
        };

        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let call = async {
            let _permit = if transport.is_multiplexed() {
                None
            } else {
                Some(gate.lock().await)
            };
            transport.request("tools/call", Some(params)).await
        };

        let reply = tokio::select! {
            biased;
            state = left_state(&mut state_rx, ConnectionState::Ready) => {
                return Err(CallFailure::Unavailable(format!("connection became {state} during the call")));
            }
            reply = tokio::time::timeout(call_timeout, call) => reply,
        };

        match reply {
            Err(_) => Err(CallFailure::TimedOut),
            Ok(Err(e)) if e.is_connection_lost() => Err(CallFailure::Unavailable(e.to_string())),
            Ok(Err(e)) => Err(CallFailure::Rpc(e)),
            Ok(Ok(value)) => serde_json::from_value::<CallToolResult>(value).map_err(|e| {
                CallFailure::Rpc(McpError::TransportError {
                    server: route.server_name.clone(),
                    reason: format!("invalid tools/call result: {e}"),
                })
            }),
        }
    }

    /// Probe every `Ready` connection with `ping`; unresponsive ones become
    /// `Failed`. Returns the names of servers marked failed.
    pub async fn check_health(&self) -> Vec<String> {
        self.inner.check_health().await
    }

    /// Run [`check_health`](Self::check_health) every `interval` until the
    /// manager is dropped or the returned handle is aborted.
    pub fn start_health_loop(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let failed = inner.check_health().await;
                if !failed.is_empty() {
                    tracing::warn!(servers = ?failed, "health check marked servers failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

// ─── Connect internals ───────────────────────────────────────────────────────

/// Abandons a reserved connection if the `connect` future is dropped early.
struct PendingConnect {
    inner: Arc<Inner>,
    key: String,
    id: u64,
    armed: bool,
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let inner = self.inner.clone();
        let key = std::mem::take(&mut self.key);
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                inner.abandon(&key, id, "connect was cancelled by the caller").await;
            });
        }
    }
}

impl Inner {
    async fn establish(
        self: &Arc<Self>,
        descriptor: &ServerDescriptor,
        key: &str,
        id: u64,
        mut state_rx: watch::Receiver<ConnectionState>,
    ) -> Result<ConnectionInfo, ConnectError> {
        let name = descriptor.name.clone();
        let cancelled = || ConnectError::Cancelled { name: name.clone() };

        // Launching
        let launch_timeout = self.settings.launch_timeout;
        let launched = tokio::select! {
            launched = tokio::time::timeout(launch_timeout, self.connector.launch(descriptor)) => launched,
            _ = left_state(&mut state_rx, ConnectionState::Launching) => return Err(cancelled()),
        };
        let transport = match launched {
            Ok(Ok(transport)) => transport,
            Ok(Err(source)) => {
                return Err(if self.abandon(key, id, &source.to_string()).await {
                    ConnectError::LaunchFailed { name: name.clone(), source }
                } else {
                    cancelled()
                });
            }
            Err(_) => {
                let source = McpError::Timeout {
                    server: name.clone(),
                    method: "launch".into(),
                    timeout_ms: millis(launch_timeout),
                };
                return Err(if self.abandon(key, id, &source.to_string()).await {
                    ConnectError::LaunchFailed { name: name.clone(), source }
                } else {
                    cancelled()
                });
            }
        };

        if !self.begin_handshake(key, id, transport.clone()).await {
            transport.terminate().await;
            return Err(cancelled());
        }

        // Handshaking
        let handshake_timeout = self.settings.handshake_timeout;
        let handshaken = tokio::select! {
            result = tokio::time::timeout(handshake_timeout, handshake(transport.as_ref())) => result,
            _ = left_state(&mut state_rx, ConnectionState::Handshaking) => return Err(cancelled()),
        };
        let outcome = match handshaken {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: name.clone(),
                method: "initialize".into(),
                timeout_ms: millis(handshake_timeout),
            }),
        };
        let handshake = match outcome {
            Ok(handshake) => handshake,
            Err(error) => {
                let suffix = diagnostics_suffix(transport.as_ref());
                let source = if suffix.is_empty() {
                    error
                } else {
                    McpError::InitFailed {
                        name: name.clone(),
                        reason: format!("{error}{suffix}"),
                    }
                };
                return Err(if self.abandon(key, id, &source.to_string()).await {
                    ConnectError::HandshakeFailed { name: name.clone(), source }
                } else {
                    cancelled()
                });
            }
        };

        self.promote(key, id, handshake, transport)
            .await
            .ok_or_else(cancelled)
    }

    /// `Launching → Handshaking`, storing the transport. `false` if the
    /// reservation was torn down meanwhile.
    async fn begin_handshake(&self, key: &str, id: u64, transport: Arc<dyn Transport>) -> bool {
        let mut live = self.live.write().await;
        let Some(conn) = live.connections.get_mut(key).filter(|c| c.id == id) else {
            return false;
        };
        if conn.state() != ConnectionState::Launching || !conn.transition(ConnectionState::Handshaking) {
            return false;
        }
        conn.transport = Some(transport);
        true
    }

    /// `Handshaking → Ready`: publish tools, start the loss monitor, and
    /// rebuild the dispatch table.
    async fn promote(
        self: &Arc<Self>,
        key: &str,
        id: u64,
        handshake: Handshake,
        transport: Arc<dyn Transport>,
    ) -> Option<ConnectionInfo> {
        let mut live = self.live.write().await;
        let conn = live.connections.get_mut(key).filter(|c| c.id == id)?;
        if conn.state() != ConnectionState::Handshaking {
            return None;
        }

        conn.tools = handshake
            .tools
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect();
        conn.server_info = handshake.server_info;
        conn.protocol_version = Some(handshake.protocol_version);
        conn.connected_at = Some(Utc::now());
        conn.ready_seq = self.next_ready_seq.fetch_add(1, Ordering::Relaxed);
        conn.transition(ConnectionState::Ready);
        conn.monitor = Some(spawn_monitor(
            Arc::downgrade(self),
            key.to_string(),
            id,
            transport,
        ));
        let info = conn.info();

        let collisions: Vec<String> = info
            .tool_names
            .iter()
            .filter(|tool| live.routes.contains_key(*tool))
            .cloned()
            .collect();
        if !collisions.is_empty() {
            tracing::info!(
                server = %info.server_name,
                tools = ?collisions,
                "tool names shadow those of earlier servers"
            );
        }

        live.rebuild_routes();
        Some(info)
    }

    /// Fail and remove a connection that never reached `Ready`. Returns
    /// `false` if a disconnect already owns its teardown.
    async fn abandon(&self, key: &str, id: u64, reason: &str) -> bool {
        let removed = {
            let mut live = self.live.write().await;
            let ours = live
                .current(key, id)
                .is_some_and(|c| c.state() != ConnectionState::Closing);
            if !ours {
                return false;
            }
            let removed = live.connections.remove(key);
            live.rebuild_routes();
            removed
        };

        if let Some(conn) = removed {
            conn.transition(ConnectionState::Failed);
            tracing::debug!(server = %conn.server_name, reason, "connection abandoned");
            if let Some(transport) = &conn.transport {
                transport.terminate().await;
            }
        }
        true
    }

    async fn disconnect(&self, name: &str) -> DisconnectOutcome {
        let key = key_of(name);

        enum Step {
            Close(u64, Option<Arc<dyn Transport>>),
            AwaitOther(watch::Receiver<ConnectionState>),
            Absent,
        }

        let step = {
            let mut live = self.live.write().await;
            let step = match live.connections.get(&key) {
                None => Step::Absent,
                Some(conn) if conn.state() == ConnectionState::Closing => {
                    Step::AwaitOther(conn.state_tx.subscribe())
                }
                Some(conn) => {
                    conn.transition(ConnectionState::Closing);
                    Step::Close(conn.id, conn.transport.clone())
                }
            };
            if matches!(step, Step::Close(..)) {
                live.rebuild_routes();
            }
            step
        };

        let (id, transport) = match step {
            Step::Absent => {
                tracing::debug!(server = %name, "disconnect: not connected");
                return DisconnectOutcome::NotConnected;
            }
            Step::AwaitOther(mut rx) => {
                let _ = rx.wait_for(|s| s.is_terminal()).await;
                return DisconnectOutcome::NotConnected;
            }
            Step::Close(id, transport) => (id, transport),
        };

        let mut forced = false;
        if let Some(transport) = transport {
            match tokio::time::timeout(self.settings.shutdown_timeout, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(server = %name, error = %e, "graceful close failed, terminating");
                    transport.terminate().await;
                    forced = true;
                }
                Err(_) => {
                    tracing::warn!(
                        server = %name,
                        timeout_ms = millis(self.settings.shutdown_timeout),
                        "graceful close timed out, terminating"
                    );
                    transport.terminate().await;
                    forced = true;
                }
            }
        }

        let removed = {
            let mut live = self.live.write().await;
            if live.current(&key, id).is_some() {
                let removed = live.connections.remove(&key);
                live.rebuild_routes();
                removed
            } else {
                None
            }
        };
        if let Some(conn) = removed {
            conn.transition(ConnectionState::Closed);
        }

        tracing::info!(server = %name, forced, "server disconnected");
        DisconnectOutcome::Disconnected { forced }
    }

    /// `Ready → Failed` after an unexpected loss. Ignored for connections
    /// that are closing or were replaced.
    async fn mark_lost(&self, key: &str, id: u64, reason: &str) {
        let removed = {
            let mut live = self.live.write().await;
            let ready = live
                .current(key, id)
                .is_some_and(|c| c.state() == ConnectionState::Ready);
            if !ready {
                return;
            }
            let removed = live.connections.remove(key);
            live.rebuild_routes();
            removed
        };

        if let Some(mut conn) = removed {
            // May run on the monitor task itself; detach instead of aborting.
            drop(conn.monitor.take());
            conn.transition(ConnectionState::Failed);
            tracing::warn!(server = %conn.server_name, reason, "connection lost");
            if let Some(transport) = &conn.transport {
                transport.terminate().await;
            }
        }
    }

    async fn check_health(&self) -> Vec<String> {
        struct Probe {
            key: String,
            id: u64,
            name: String,
            transport: Arc<dyn Transport>,
            gate: Arc<Mutex<()>>,
        }

        let probes: Vec<Probe> = {
            let live = self.live.read().await;
            live.connections
                .iter()
                .filter(|(_, c)| c.state() == ConnectionState::Ready)
                .filter_map(|(key, c)| {
                    Some(Probe {
                        key: key.clone(),
                        id: c.id,
                        name: c.server_name.clone(),
                        transport: c.transport.clone()?,
                        gate: c.call_gate.clone(),
                    })
                })
                .collect()
        };

        let timeout = self.settings.health_probe_timeout;
        let verdicts = futures::future::join_all(probes.into_iter().map(|probe| async move {
            let permit = if probe.transport.is_multiplexed() {
                None
            } else {
                match probe.gate.clone().try_lock_owned() {
                    Ok(permit) => Some(permit),
                    // A call is in flight; the server is evidently busy, not dead.
                    Err(_) => return (probe, None),
                }
            };
            let verdict = match tokio::time::timeout(timeout, probe.transport.request("ping", None)).await {
                Ok(Ok(_)) => None,
                // Any JSON-RPC reply proves the server is alive.
                Ok(Err(McpError::ServerError { .. })) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("health probe timed out after {}ms", millis(timeout))),
            };
            drop(permit);
            (probe, verdict)
        }))
        .await;

        let mut failed = Vec::new();
        for (probe, verdict) in verdicts {
            if let Some(reason) = verdict {
                self.mark_lost(&probe.key, probe.id, &reason).await;
                failed.push(probe.name);
            }
        }
        failed
    }
}

/// Resolve once the published state differs from `state`, with the new
/// state. A dropped sender means the connection was removed.
async fn left_state(
    rx: &mut watch::Receiver<ConnectionState>,
    state: ConnectionState,
) -> ConnectionState {
    match rx.wait_for(|s| *s != state).await {
        Ok(next) => *next,
        Err(_) => ConnectionState::Closed,
    }
}

/// Wait for the transport's loss signal and fail the connection.
fn spawn_monitor(
    inner: Weak<Inner>,
    key: String,
    id: u64,
    transport: Arc<dyn Transport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = transport.closed().await;
        drop(transport);
        if let Some(inner) = inner.upgrade() {
            inner.mark_lost(&key, id, &reason).await;
        }
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
