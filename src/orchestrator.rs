//! Orchestration facade: the single entry point for the agent loop.
//!
//! An [`OrchestrationContext`] owns the catalog, the recommendation index and
//! the connector, with an explicit init / reload / shutdown lifecycle. Each
//! conversation opens its own [`Session`], whose connection set is disjoint
//! from every other session's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::catalog::loader::load_catalog;
use crate::catalog::registry::{with_discovered, RegistryDiscovery};
use crate::catalog::{Catalog, CatalogError, SharedCatalog};
use crate::config::OrchestratorConfig;
use crate::connection::{
    ConnectError, ConnectionInfo, ConnectionManager, ConnectionSettings, ConnectionState,
    DisconnectOutcome,
};
use crate::mcp_client::{Connector, McpConnector, McpError};
use crate::recommend::{
    embedder_from_config, keyword_rank, BuildReport, EmbedError, Embedder, Recommendation,
    RecommendationIndex,
};
use crate::router::{ToolCallRequest, ToolCallResult, ToolDefinition, ToolError, ToolRouter};

/// Errors while constructing or reloading the orchestration context.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("embedder setup failed: {0}")]
    Embedder(#[from] EmbedError),

    #[error("connector setup failed: {0}")]
    Connector(#[from] McpError),
}

// ─── Context ────────────────────────────────────────────────────────────────

struct Shared {
    config: OrchestratorConfig,
    catalog: SharedCatalog,
    index: RecommendationIndex,
    connector: Arc<dyn Connector>,
    /// Managers of open sessions, for teardown on shutdown.
    sessions: StdMutex<HashMap<Uuid, ConnectionManager>>,
}

impl Shared {
    async fn recommend_scored(&self, query: &str, k: usize) -> Vec<Recommendation> {
        let k = k.min(self.config.recommend.max_results);
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }
        match self.index.query(query, k).await {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, falling back to keyword ranking");
                keyword_rank(&self.catalog.snapshot(), query, k)
            }
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ConnectionManager>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide orchestration state, constructed explicitly and passed
/// around rather than held globally.
#[derive(Clone)]
pub struct OrchestrationContext {
    shared: Arc<Shared>,
    registry: Option<Arc<RegistryDiscovery>>,
}

impl OrchestrationContext {
    /// Assemble a context from already-built parts.
    ///
    /// The index is empty until [`init`](Self::init) runs.
    pub fn new(
        config: OrchestratorConfig,
        catalog: Catalog,
        embedder: Arc<dyn Embedder>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let index = RecommendationIndex::new(embedder).with_max_results(config.recommend.max_results);
        Self {
            shared: Arc::new(Shared {
                config,
                catalog: SharedCatalog::new(catalog),
                index,
                connector,
                sessions: StdMutex::new(HashMap::new()),
            }),
            registry: None,
        }
    }

    /// Merge servers discovered on an npm registry into the catalog at
    /// [`init`](Self::init) and [`reload`](Self::reload).
    pub fn with_registry(mut self, discovery: RegistryDiscovery) -> Self {
        self.registry = Some(Arc::new(discovery));
        self
    }

    /// Load the catalog, embedder and connector described by `config`.
    pub fn from_config(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let catalog = load_catalog(&config.catalog)?;
        let embedder = embedder_from_config(&config.embedding)?;
        let connector = Arc::new(McpConnector::new(config.connection.working_dir.clone())?);
        let registry = if config.catalog.registry.enabled {
            Some(RegistryDiscovery::new(&config.catalog.registry)?)
        } else {
            None
        };
        tracing::info!(servers = catalog.len(), "orchestration context created");

        let context = Self::new(config, catalog, embedder, connector);
        Ok(match registry {
            Some(discovery) => context.with_registry(discovery),
            None => context,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Current catalog image.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.shared.catalog.snapshot()
    }

    /// Build the recommendation index over the current catalog, after
    /// merging registry servers when discovery is enabled.
    pub async fn init(&self) -> BuildReport {
        if self.registry.is_some() {
            let catalog = self.with_registry_servers(&self.shared.catalog.snapshot()).await;
            self.shared.catalog.replace(catalog);
        }
        self.rebuild_index().await
    }

    async fn rebuild_index(&self) -> BuildReport {
        let catalog = self.shared.catalog.snapshot();
        self.shared.index.build(&catalog).await
    }

    async fn with_registry_servers(&self, base: &Catalog) -> Catalog {
        match &self.registry {
            Some(discovery) => with_discovered(base, discovery.discover().await),
            None => base.clone(),
        }
    }

    /// Swap in a new catalog and rebuild the index.
    ///
    /// Live connections are untouched; the new catalog only affects later
    /// `connect` and `recommend` calls.
    pub async fn replace_catalog(&self, catalog: Catalog) -> BuildReport {
        let servers = catalog.len();
        self.shared.catalog.replace(catalog);
        tracing::info!(servers, "catalog replaced");
        self.rebuild_index().await
    }

    /// Re-read the configured catalog source and rebuild the index.
    pub async fn reload(&self) -> Result<BuildReport, OrchestratorError> {
        let catalog = load_catalog(&self.shared.config.catalog)?;
        let catalog = self.with_registry_servers(&catalog).await;
        Ok(self.replace_catalog(catalog).await)
    }

    /// Server names ranked for `query`, best first, at most `k`.
    pub async fn recommend(&self, query: &str, k: usize) -> Vec<String> {
        self.recommend_scored(query, k)
            .await
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    /// Like [`recommend`](Self::recommend), with descriptions and scores.
    pub async fn recommend_scored(&self, query: &str, k: usize) -> Vec<Recommendation> {
        self.shared.recommend_scored(query, k).await
    }

    /// Open a conversation session with its own connection set.
    pub async fn open_session(&self) -> Session {
        let config = &self.shared.config;
        let manager = ConnectionManager::new(
            self.shared.catalog.clone(),
            self.shared.connector.clone(),
            ConnectionSettings::from(&config.connection),
        );
        let router = ToolRouter::new(manager.clone(), config.router.call_timeout());
        let health = config
            .connection
            .health_check_interval()
            .map(|interval| manager.start_health_loop(interval));

        let id = Uuid::new_v4();
        self.shared.sessions().insert(id, manager.clone());
        tracing::info!(session = %id, "session opened");

        Session {
            id,
            shared: self.shared.clone(),
            manager,
            router,
            health: StdMutex::new(health),
        }
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions().len()
    }

    /// Disconnect every server of every open session.
    pub async fn shutdown(&self) {
        let managers: Vec<(Uuid, ConnectionManager)> = self.shared.sessions().drain().collect();
        tracing::info!(sessions = managers.len(), "shutting down orchestration context");
        futures::future::join_all(managers.iter().map(|(_, manager)| manager.disconnect_all())).await;
    }
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("servers", &self.shared.catalog.snapshot().len())
            .field("index", &self.shared.index)
            .field("sessions", &self.session_count())
            .field("registry", &self.registry)
            .finish()
    }
}

// ─── Session ────────────────────────────────────────────────────────────────

/// One conversation's view of the orchestrator.
pub struct Session {
    id: Uuid,
    shared: Arc<Shared>,
    manager: ConnectionManager,
    router: ToolRouter,
    health: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recommend(&self, query: &str, k: usize) -> Vec<String> {
        self.recommend_scored(query, k)
            .await
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    pub async fn recommend_scored(&self, query: &str, k: usize) -> Vec<Recommendation> {
        self.shared.recommend_scored(query, k).await
    }

    /// Launch and handshake a catalog server; its tools become routable.
    pub async fn connect(&self, server_name: &str) -> Result<ConnectionInfo, ConnectError> {
        self.manager.connect(server_name).await
    }

    /// Idempotent: disconnecting an absent server is `NotConnected`.
    pub async fn disconnect(&self, server_name: &str) -> DisconnectOutcome {
        self.manager.disconnect(server_name).await
    }

    pub async fn list_connected(&self) -> Vec<ConnectionInfo> {
        self.manager.list_connected().await
    }

    pub async fn state_of(&self, server_name: &str) -> Option<ConnectionState> {
        self.manager.state_of(server_name).await
    }

    pub async fn invoke(&self, request: &ToolCallRequest) -> Result<ToolCallResult, ToolError> {
        self.router.invoke(request).await
    }

    pub async fn invoke_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        self.router.invoke_tool(tool_name, arguments).await
    }

    pub async fn invoke_tool_on(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        self.router.invoke_on(server_name, tool_name, arguments).await
    }

    /// Dispatch one turn's tool calls concurrently.
    pub async fn invoke_all(
        &self,
        requests: &[ToolCallRequest],
    ) -> Vec<Result<ToolCallResult, ToolError>> {
        self.router.invoke_all(requests).await
    }

    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.router.tool_definitions().await
    }

    pub async fn to_openai_tools(&self) -> Vec<serde_json::Value> {
        self.router.to_openai_tools().await
    }

    /// Probe connections now instead of waiting for the health loop.
    pub async fn check_health(&self) -> Vec<String> {
        self.manager.check_health().await
    }

    /// Stop health probing and disconnect every server of this session.
    pub async fn close(self) {
        self.stop_health_loop();
        self.shared.sessions().remove(&self.id);
        self.manager.disconnect_all().await;
        tracing::info!(session = %self.id, "session closed");
    }

    fn stop_health_loop(&self) {
        if let Some(handle) = self
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_health_loop();
        self.shared.sessions().remove(&self.id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
