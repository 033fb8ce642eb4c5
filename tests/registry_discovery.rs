//! npm registry discovery against a local registry.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::{context_with, scenario_catalog, test_config, FakeConnector};
use mcp_concierge::catalog::registry::REGISTRY_TAG;
use mcp_concierge::catalog::RegistryDiscovery;
use mcp_concierge::config::RegistryConfig;

/// Serves package documents by path; unknown paths are 404.
struct LocalRegistry {
    url: String,
    hits: Arc<AtomicUsize>,
}

async fn local_registry(documents: HashMap<&'static str, String>) -> LocalRegistry {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let documents = documents.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let text = String::from_utf8_lossy(&request);
                let path = text.split_whitespace().nth(1).unwrap_or("/");
                let (status, body) = match documents.get(path.trim_start_matches('/')) {
                    Some(body) => ("200 OK", body.clone()),
                    None => ("404 Not Found", "{}".to_string()),
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    LocalRegistry { url, hits }
}

fn package(latest: &str, description: &str) -> String {
    json!({
        "dist-tags": { "latest": latest },
        "versions": { latest: { "description": description } },
    })
    .to_string()
}

fn registry_config(url: &str, packages: &[&str]) -> RegistryConfig {
    RegistryConfig {
        enabled: true,
        url: url.to_string(),
        packages: packages.iter().map(|p| p.to_string()).collect(),
        ..RegistryConfig::default()
    }
}

fn discovery(config: &RegistryConfig) -> RegistryDiscovery {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    RegistryDiscovery::with_client(config, http)
}

#[tokio::test]
async fn test_discovery_skips_failures_and_caches() {
    let registry = local_registry(HashMap::from([
        ("mcp-server-slack", package("1.2.0", "Post messages to Slack channels")),
        ("mcp-server-garbled", "not json".to_string()),
    ]))
    .await;
    let config = registry_config(
        &registry.url,
        &["mcp-server-slack", "mcp-server-missing", "mcp-server-garbled"],
    );
    let discovery = discovery(&config);

    let servers = discovery.discover().await;
    let names: Vec<&str> = servers.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["slack"]);
    assert_eq!(servers[0].description, "Post messages to Slack channels");
    assert!(servers[0].tags.contains(REGISTRY_TAG));
    assert_eq!(registry.hits.load(Ordering::SeqCst), 3);

    let again = discovery.discover().await;
    assert_eq!(again, servers);
    assert_eq!(registry.hits.load(Ordering::SeqCst), 3, "second call is served from cache");
}

#[tokio::test]
async fn test_expired_cache_fetches_again() {
    let registry = local_registry(HashMap::from([(
        "mcp-server-slack",
        package("1.2.0", "Slack"),
    )]))
    .await;
    let mut config = registry_config(&registry.url, &["mcp-server-slack"]);
    config.cache_ttl_hours = 0;
    let discovery = discovery(&config);

    discovery.discover().await;
    discovery.discover().await;
    assert_eq!(registry.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_init_merges_registry_servers_without_overriding() {
    let registry = local_registry(HashMap::from([
        ("mcp-server-time", package("0.6.2", "registry clock")),
        ("mcp-server-slack", package("1.2.0", "Post messages to Slack channels")),
    ]))
    .await;
    let config = registry_config(&registry.url, &["mcp-server-time", "mcp-server-slack"]);

    let context = context_with(
        test_config(),
        scenario_catalog(),
        Arc::new(FakeConnector::new()),
    )
    .await
    .with_registry(discovery(&config));
    let report = context.init().await;

    let catalog = context.catalog();
    assert_eq!(catalog.names(), vec!["time", "filesystem", "slack"]);
    assert_eq!(catalog.get("time").unwrap().description, "current time in any timezone");
    assert_eq!(report.indexed, 3);
    assert_eq!(
        context.recommend("send a message to a slack channel", 1).await,
        vec!["slack"]
    );
}
