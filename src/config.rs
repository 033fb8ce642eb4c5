//! Orchestrator configuration loading.
//!
//! Reads `concierge.yaml` and resolves environment variables. Every field has
//! a default, so a missing or empty file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MCP_CONCIERGE_CONFIG";

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "concierge.yaml";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `concierge.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub catalog: CatalogConfig,
    pub embedding: EmbeddingConfig,
    pub connection: ConnectionConfig,
    pub router: RouterConfig,
    pub recommend: RecommendConfig,
    pub log: LogConfig,
}

/// Where the server catalog comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Optional JSON/YAML catalog file. Entries override built-ins by name.
    pub path: Option<PathBuf>,
    /// Include the curated built-in server list.
    pub include_builtin: bool,
    pub registry: RegistryConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            include_builtin: true,
            registry: RegistryConfig::default(),
        }
    }
}

/// npm registry discovery. Off by default; when on, it runs at init and
/// reload and only adds names the catalog does not already have.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub enabled: bool,
    pub url: String,
    /// Packages looked up on the registry.
    pub packages: Vec<String>,
    pub timeout_secs: u64,
    pub cache_ttl_hours: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://registry.npmjs.org".to_string(),
            packages: [
                "mcp-server-fetch",
                "mcp-server-sqlite",
                "mcp-server-time",
                "mcp-server-github",
                "mcp-server-brave-search",
                "mcp-server-postgres",
                "mcp-server-slack",
                "mcp-server-filesystem",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            timeout_secs: 10,
            cache_ttl_hours: 24,
        }
    }
}

impl RegistryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }
}

/// Embedding backend for the recommendation index.
///
/// With no `endpoint`, the local hashed bag-of-words embedder is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible server exposing `/embeddings`.
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
    /// Vector size of the local embedder.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            timeout_secs: 30,
            dimension: 256,
        }
    }
}

/// Connection lifecycle timeouts and health checking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub launch_timeout_secs: u64,
    /// Set generously: some servers import heavy frameworks at startup.
    pub handshake_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Active `ping` probe interval. 0 disables probing.
    pub health_check_interval_secs: u64,
    pub health_probe_timeout_secs: u64,
    /// Default working directory for stdio servers.
    pub working_dir: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            launch_timeout_secs: 30,
            handshake_timeout_secs: 30,
            shutdown_timeout_secs: 5,
            health_check_interval_secs: 60,
            health_probe_timeout_secs: 10,
            working_dir: None,
        }
    }
}

impl ConnectionConfig {
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.health_check_interval_secs))
    }
}

/// Tool router settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub call_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
        }
    }
}

impl RouterConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Recommendation defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub default_k: usize,
    /// Hard cap on results regardless of the requested `k`.
    pub max_results: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            default_k: 3,
            max_results: 30,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for `concierge.log`. Logs go to stderr when unset.
    pub directory: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: None,
            filter: "mcp_concierge=info,warn".to_string(),
            json: false,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `MCP_CONCIERGE_CONFIG` first, then `concierge.yaml` in `start`.
/// Returns `None` when neither exists (defaults apply).
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    let candidate = start.join(DEFAULT_CONFIG_FILE);
    candidate.exists().then_some(candidate)
}

/// Load and parse a configuration file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    parse_config(&raw)
}

/// Parse configuration text (after env-var interpolation).
pub fn parse_config(raw: &str) -> Result<OrchestratorConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(OrchestratorConfig::default());
    }

    let mut config: OrchestratorConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;

    for path in [
        &mut config.catalog.path,
        &mut config.connection.working_dir,
        &mut config.log.directory,
    ]
    .into_iter()
    .flatten()
    {
        *path = PathBuf::from(expand_tilde(&path.to_string_lossy()));
    }

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
pub(crate) fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__CONCIERGE_TEST_UNSET__");
        let result = interpolate_env_vars("${__CONCIERGE_TEST_UNSET__:-/fallback/path}");
        assert_eq!(result, "/fallback/path");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__CONCIERGE_TEST_VAR__", "http://embed:8080");
        let result = interpolate_env_vars("endpoint: ${__CONCIERGE_TEST_VAR__:-none}");
        assert_eq!(result, "endpoint: http://embed:8080");
        std::env::remove_var("__CONCIERGE_TEST_VAR__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with $dollar but no braces";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/catalogs/servers.yaml");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/catalogs/servers.yaml"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.catalog.include_builtin);
        assert_eq!(config.router.call_timeout_ms, 30_000);
        assert_eq!(config.recommend.max_results, 30);
        assert_eq!(config.connection.shutdown_timeout_secs, 5);
        assert!(config.embedding.endpoint.is_none());
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let yaml = r#"
            router:
              call_timeout_ms: 1500
            connection:
              health_check_interval_secs: 0
            recommend:
              default_k: 5
        "#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.router.call_timeout(), Duration::from_millis(1500));
        assert!(config.connection.health_check_interval().is_none());
        assert_eq!(config.connection.handshake_timeout_secs, 30);
        assert_eq!(config.recommend.default_k, 5);
        assert_eq!(config.recommend.max_results, 30);
    }

    #[test]
    fn test_registry_section() {
        let config = parse_config("").unwrap();
        assert!(!config.catalog.registry.enabled);
        assert_eq!(config.catalog.registry.packages.len(), 8);
        assert_eq!(config.catalog.registry.cache_ttl(), Duration::from_secs(24 * 3600));

        let yaml = r#"
            catalog:
              registry:
                enabled: true
                url: http://localhost:4873
                packages: [mcp-server-time]
        "#;
        let registry = parse_config(yaml).unwrap().catalog.registry;
        assert!(registry.enabled);
        assert_eq!(registry.url, "http://localhost:4873");
        assert_eq!(registry.packages, vec!["mcp-server-time"]);
        assert_eq!(registry.timeout_secs, 10);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let err = parse_config("router: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "catalog:\n  include_builtin: false\nlog:\n  json: true\n").unwrap();

        let config = load_config(&path).unwrap();
        assert!(!config.catalog.include_builtin);
        assert!(config.log.json);
    }

    #[test]
    fn test_find_config_path_in_start_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_path(dir.path()).is_none() || std::env::var(CONFIG_ENV_VAR).is_ok());

        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "").unwrap();
        if std::env::var(CONFIG_ENV_VAR).is_err() {
            assert_eq!(
                find_config_path(dir.path()),
                Some(dir.path().join(DEFAULT_CONFIG_FILE))
            );
        }
    }
}
