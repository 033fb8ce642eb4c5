//! Catalog file loader.
//!
//! Accepts JSON or YAML (chosen by file extension). The document is either a
//! bare list of entries or `{ servers: [...] }`. Unusable entries are skipped
//! with a warning rather than failing the whole file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::descriptor::{LaunchSpec, ServerDescriptor};
use super::errors::CatalogError;
use super::Catalog;
use crate::config::{interpolate_env_vars, CatalogConfig};

// ─── File Format ─────────────────────────────────────────────────────────────

/// Key under which a wrapped document lists its servers.
const SERVERS_KEY: &str = "servers";

fn not_a_list(origin: &str) -> CatalogError {
    CatalogError::ParseFailed {
        path: origin.to_string(),
        reason: format!("expected a list of servers or a `{SERVERS_KEY}` list"),
    }
}

type EntryResults = Vec<Result<CatalogEntry, String>>;

/// Split a JSON document into per-entry results so one bad entry does not
/// sink the rest.
fn json_entries(raw: &str, origin: &str) -> Result<EntryResults, CatalogError> {
    use serde_json::Value;

    let document: Value = serde_json::from_str(raw).map_err(|e| CatalogError::ParseFailed {
        path: origin.to_string(),
        reason: e.to_string(),
    })?;
    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(SERVERS_KEY) {
            Some(Value::Array(items)) => items,
            _ => return Err(not_a_list(origin)),
        },
        _ => return Err(not_a_list(origin)),
    };
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|e| e.to_string()))
        .collect())
}

fn yaml_entries(raw: &str, origin: &str) -> Result<EntryResults, CatalogError> {
    use serde_yaml::Value;

    let document: Value = serde_yaml::from_str(raw).map_err(|e| CatalogError::ParseFailed {
        path: origin.to_string(),
        reason: e.to_string(),
    })?;
    let items = match document {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items,
        Value::Mapping(mut map) => match map.remove(SERVERS_KEY) {
            Some(Value::Sequence(items)) => items,
            _ => return Err(not_a_list(origin)),
        },
        _ => return Err(not_a_list(origin)),
    };
    Ok(items
        .into_iter()
        .map(|item| serde_yaml::from_value(item).map_err(|e| e.to_string()))
        .collect())
}

/// One server as written in a catalog file.
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_type", rename = "type")]
    server_type: String,
    /// Full command line; split on whitespace when `args` is absent.
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

fn default_type() -> String {
    "stdio".to_string()
}

impl CatalogEntry {
    fn into_descriptor(self) -> Result<ServerDescriptor, CatalogError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(CatalogError::InvalidEntry {
                name: self.name,
                reason: "name is empty".into(),
            });
        }

        let launch = match self.server_type.to_lowercase().as_str() {
            "stdio" => {
                let line = self.command.unwrap_or_default();
                match LaunchSpec::from_command_line(&line) {
                    Some(LaunchSpec::Stdio {
                        command,
                        args: mut split_args,
                        ..
                    }) => {
                        split_args.extend(self.args);
                        LaunchSpec::Stdio {
                            command,
                            args: split_args,
                            env: self.env,
                            cwd: self.cwd,
                        }
                    }
                    _ => {
                        return Err(CatalogError::InvalidEntry {
                            name,
                            reason: "stdio server needs a command".into(),
                        })
                    }
                }
            }
            "http" | "streamable_http" | "streamable-http" => match self.url {
                Some(url) if !url.trim().is_empty() => LaunchSpec::http(url.trim()),
                _ => {
                    return Err(CatalogError::InvalidEntry {
                        name,
                        reason: "http server needs a url".into(),
                    })
                }
            },
            other => {
                return Err(CatalogError::InvalidEntry {
                    name,
                    reason: format!("unknown server type '{other}'"),
                })
            }
        };

        let description = if self.description.trim().is_empty() {
            format!("MCP server: {name}")
        } else {
            self.description.trim().to_string()
        };

        Ok(ServerDescriptor::new(name, launch, description).with_tags(self.tags))
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Parse catalog text. `yaml` selects the YAML parser, otherwise JSON.
pub fn parse_catalog(raw: &str, yaml: bool, origin: &str) -> Result<Catalog, CatalogError> {
    let interpolated = interpolate_env_vars(raw);

    let entries = if yaml {
        yaml_entries(&interpolated, origin)?
    } else {
        json_entries(&interpolated, origin)?
    };

    let descriptors = entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(reason) => {
                    tracing::warn!(
                        catalog = %origin,
                        position,
                        error = %reason,
                        "skipping unreadable catalog entry"
                    );
                    return None;
                }
            };
            match entry.into_descriptor() {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    tracing::warn!(catalog = %origin, error = %e, "skipping catalog entry");
                    None
                }
            }
        });

    Ok(Catalog::from_descriptors(descriptors))
}

/// Load a catalog file.
pub fn load_catalog_file(path: &Path) -> Result<Catalog, CatalogError> {
    let origin = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::ReadFailed {
        path: origin.clone(),
        reason: e.to_string(),
    })?;

    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let catalog = parse_catalog(&raw, yaml, &origin)?;
    tracing::info!(catalog = %origin, servers = catalog.len(), "catalog file loaded");
    Ok(catalog)
}

/// Build the catalog described by the configuration: the built-in list
/// (if enabled) overridden by the configured file (if any).
pub fn load_catalog(config: &CatalogConfig) -> Result<Catalog, CatalogError> {
    let base = if config.include_builtin {
        Catalog::builtin()
    } else {
        Catalog::new()
    };

    match &config.path {
        Some(path) => Ok(Catalog::merged(base, load_catalog_file(path)?)),
        None => Ok(base),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_json_list() {
        let raw = r#"[
            {"name": "time", "description": "Current time", "command": "uvx mcp-server-time --local-timezone UTC"},
            {"name": "remote", "type": "http", "url": "http://localhost:9000/mcp", "tags": ["remote"]}
        ]"#;
        let catalog = parse_catalog(raw, false, "test").unwrap();
        assert_eq!(catalog.names(), vec!["time", "remote"]);

        match &catalog.get("time").unwrap().launch {
            LaunchSpec::Stdio { command, args, .. } => {
                assert_eq!(command, "uvx");
                assert_eq!(args, &vec!["mcp-server-time", "--local-timezone", "UTC"]);
            }
            LaunchSpec::Http { .. } => panic!("expected stdio"),
        }
        let remote = catalog.get("remote").unwrap();
        assert_eq!(remote.launch, LaunchSpec::http("http://localhost:9000/mcp"));
        assert!(remote.tags.contains("remote"));
    }

    #[test]
    fn test_parse_yaml_wrapped_with_args_and_env() {
        let raw = r#"
servers:
  - name: files
    command: npx
    args: ["--yes", "@modelcontextprotocol/server-filesystem", "."]
    env:
      LOG_LEVEL: debug
    cwd: /tmp
"#;
        let catalog = parse_catalog(raw, true, "test").unwrap();
        let files = catalog.get("files").unwrap();
        assert_eq!(files.description, "MCP server: files");
        match &files.launch {
            LaunchSpec::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 3);
                assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
                assert_eq!(cwd.as_deref(), Some("/tmp"));
            }
            LaunchSpec::Http { .. } => panic!("expected stdio"),
        }
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let raw = r#"[
            {"name": "no-command"},
            {"name": "bad-type", "type": "carrier-pigeon", "command": "x"},
            {"name": "no-url", "type": "http"},
            {"name": "ok", "command": "run-ok"}
        ]"#;
        let catalog = parse_catalog(raw, false, "test").unwrap();
        assert_eq!(catalog.names(), vec!["ok"]);
    }

    #[test]
    fn test_mistyped_entries_do_not_sink_the_file() {
        let raw = r#"[
            {"description": "no name here", "command": "x"},
            {"name": "one-tag", "command": "x", "tags": "single-string"},
            {"name": "ok", "command": "run-ok"}
        ]"#;
        let catalog = parse_catalog(raw, false, "test").unwrap();
        assert_eq!(catalog.names(), vec!["ok"]);

        let raw = "servers:\n  - description: nameless\n    command: x\n  - name: ok\n    command: run-ok\n    tags: [a, b]\n";
        let catalog = parse_catalog(raw, true, "test").unwrap();
        assert_eq!(catalog.names(), vec!["ok"]);
    }

    #[test]
    fn test_document_must_hold_a_list() {
        let err = parse_catalog(r#"{"servers": 3}"#, false, "odd.json").unwrap_err();
        assert!(matches!(err, CatalogError::ParseFailed { ref path, .. } if path == "odd.json"));
        assert!(parse_catalog("", true, "empty.yaml").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let err = parse_catalog("{ not json", false, "broken.json").unwrap_err();
        assert!(matches!(err, CatalogError::ParseFailed { ref path, .. } if path == "broken.json"));
    }

    #[test]
    fn test_env_vars_interpolated() {
        std::env::set_var("__CONCIERGE_CATALOG_URL__", "http://mcp.internal:7000");
        let raw = r#"[{"name": "svc", "type": "http", "url": "${__CONCIERGE_CATALOG_URL__}/mcp"}]"#;
        let catalog = parse_catalog(raw, false, "test").unwrap();
        assert_eq!(
            catalog.get("svc").unwrap().launch,
            LaunchSpec::http("http://mcp.internal:7000/mcp")
        );
        std::env::remove_var("__CONCIERGE_CATALOG_URL__");
    }

    #[test]
    fn test_load_catalog_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.yml");
        std::fs::write(&path, "- name: time\n  command: uvx mcp-server-time\n").unwrap();

        let catalog = load_catalog_file(&path).unwrap();
        assert!(catalog.contains("time"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_catalog_file(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(matches!(err, CatalogError::ReadFailed { .. }));
    }

    #[test]
    fn test_load_catalog_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"name": "time", "description": "Pinned clock", "command": "my-time-server"}]"#,
        )
        .unwrap();

        let config = CatalogConfig {
            path: Some(PathBuf::from(&path)),
            include_builtin: true,
            ..CatalogConfig::default()
        };
        let catalog = load_catalog(&config).unwrap();
        assert_eq!(catalog.len(), Catalog::builtin().len());
        assert_eq!(catalog.get("time").unwrap().description, "Pinned clock");

        let only_file = load_catalog(&CatalogConfig {
            path: Some(path),
            include_builtin: false,
            ..CatalogConfig::default()
        })
        .unwrap();
        assert_eq!(only_file.names(), vec!["time"]);
    }
}
