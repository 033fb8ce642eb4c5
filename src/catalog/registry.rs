//! npm registry discovery.
//!
//! Each configured package is looked up at `{url}/{package}`. The description
//! of its latest published version becomes a stdio descriptor launched with
//! `uvx`. Results are cached for the configured TTL; failed lookups are
//! skipped with a warning.

use std::time::{Duration, Instant};

use reqwest::Client as HttpClient;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::descriptor::{LaunchSpec, ServerDescriptor};
use super::errors::CatalogError;
use super::Catalog;
use crate::config::RegistryConfig;

const PACKAGE_PREFIX: &str = "mcp-server-";

/// Tag carried by every discovered descriptor.
pub const REGISTRY_TAG: &str = "npm";

// ─── Package Document ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct PackageDocument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: DistTags,
    #[serde(default)]
    versions: std::collections::HashMap<String, VersionDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct DistTags {
    latest: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionDocument {
    #[serde(default)]
    description: Option<String>,
}

/// Descriptor for `package` from its registry document. `None` when the
/// document names no latest version.
pub fn descriptor_from_package(
    package: &str,
    document: serde_json::Value,
) -> Option<ServerDescriptor> {
    let document: PackageDocument = serde_json::from_value(document).ok()?;
    let latest = document.dist_tags.latest?;
    let description = document
        .versions
        .get(&latest)
        .and_then(|v| v.description.as_deref())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("MCP server: {package}"));

    let name = package.strip_prefix(PACKAGE_PREFIX).unwrap_or(package);
    let launch = LaunchSpec::from_command_line(&format!("uvx {package}"))?;
    Some(ServerDescriptor::new(name, launch, description).with_tags([REGISTRY_TAG]))
}

/// Append discovered servers whose names `base` does not already know.
pub fn with_discovered(base: &Catalog, discovered: Vec<ServerDescriptor>) -> Catalog {
    let mut catalog = base.clone();
    let mut added = 0;
    for descriptor in discovered {
        if catalog.push(descriptor) {
            added += 1;
        }
    }
    tracing::debug!(added, servers = catalog.len(), "registry servers merged");
    catalog
}

// ─── Discovery ───────────────────────────────────────────────────────────────

struct CachedDiscovery {
    fetched_at: Instant,
    servers: Vec<ServerDescriptor>,
}

/// Looks up configured packages on an npm-compatible registry.
pub struct RegistryDiscovery {
    http: HttpClient,
    base_url: String,
    packages: Vec<String>,
    ttl: Duration,
    cache: Mutex<Option<CachedDiscovery>>,
}

impl RegistryDiscovery {
    pub fn new(config: &RegistryConfig) -> Result<Self, CatalogError> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CatalogError::Registry {
                package: config.url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_client(config, http))
    }

    /// Use a caller-provided HTTP client.
    pub fn with_client(config: &RegistryConfig, http: HttpClient) -> Self {
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            packages: config.packages.clone(),
            ttl: config.cache_ttl(),
            cache: Mutex::new(None),
        }
    }

    /// Discovered servers, from the cache while it is fresh.
    pub async fn discover(&self) -> Vec<ServerDescriptor> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.servers.clone();
            }
        }

        let lookups = self.packages.iter().map(|package| self.lookup(package));
        let results = futures::future::join_all(lookups).await;

        let mut servers = Vec::new();
        for (package, result) in self.packages.iter().zip(results) {
            match result {
                Ok(Some(descriptor)) => servers.push(descriptor),
                Ok(None) => {
                    tracing::debug!(package = %package, "package has no published version");
                }
                Err(e) => {
                    tracing::warn!(package = %package, error = %e, "skipping registry package");
                }
            }
        }
        tracing::info!(
            registry = %self.base_url,
            found = servers.len(),
            packages = self.packages.len(),
            "registry discovery finished"
        );

        *cache = Some(CachedDiscovery {
            fetched_at: Instant::now(),
            servers: servers.clone(),
        });
        servers
    }

    async fn lookup(&self, package: &str) -> Result<Option<ServerDescriptor>, CatalogError> {
        let failed = |reason: String| CatalogError::Registry {
            package: package.to_string(),
            reason,
        };

        let response = self
            .http
            .get(format!("{}/{package}", self.base_url))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status().as_u16())));
        }
        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| failed(format!("invalid package document: {e}")))?;
        Ok(descriptor_from_package(package, document))
    }
}

impl std::fmt::Debug for RegistryDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryDiscovery")
            .field("base_url", &self.base_url)
            .field("packages", &self.packages.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_uses_latest_description() {
        let document = json!({
            "dist-tags": { "latest": "0.6.2" },
            "versions": {
                "0.1.0": { "description": "old" },
                "0.6.2": { "description": "Time and timezone conversion" },
            }
        });
        let descriptor = descriptor_from_package("mcp-server-time", document).unwrap();
        assert_eq!(descriptor.name, "time");
        assert_eq!(descriptor.description, "Time and timezone conversion");
        assert_eq!(descriptor.launch.to_string(), "uvx mcp-server-time");
        assert!(descriptor.tags.contains(REGISTRY_TAG));
    }

    #[test]
    fn test_descriptor_falls_back_to_package_name() {
        let document = json!({ "dist-tags": { "latest": "1.0.0" }, "versions": {} });
        let descriptor = descriptor_from_package("weather-mcp", document).unwrap();
        assert_eq!(descriptor.name, "weather-mcp");
        assert_eq!(descriptor.description, "MCP server: weather-mcp");
    }

    #[test]
    fn test_unpublished_package_is_none() {
        assert!(descriptor_from_package("mcp-server-x", json!({ "versions": {} })).is_none());
        assert!(descriptor_from_package("mcp-server-x", json!("not a document")).is_none());
    }

    #[test]
    fn test_with_discovered_keeps_existing_names() {
        let launch = || LaunchSpec::from_command_line("run").unwrap();
        let base = Catalog::from_descriptors(vec![ServerDescriptor::new(
            "time",
            launch(),
            "curated clock",
        )]);
        let merged = with_discovered(
            &base,
            vec![
                ServerDescriptor::new("Time", launch(), "registry clock"),
                ServerDescriptor::new("slack", launch(), "registry chat"),
            ],
        );
        assert_eq!(merged.names(), vec!["time", "slack"]);
        assert_eq!(merged.get("time").unwrap().description, "curated clock");
        assert_eq!(base.len(), 1);
    }
}
