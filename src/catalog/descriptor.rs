//! Server descriptors and how to launch them.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

// ─── LaunchSpec ──────────────────────────────────────────────────────────────

/// How to reach a server. Opaque to everything except the connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaunchSpec {
    /// Local child process speaking line-delimited JSON-RPC over stdio.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        /// Working directory for the process (overrides the connector default).
        cwd: Option<String>,
    },
    /// Remote endpoint speaking MCP streamable HTTP.
    Http { url: String },
}

impl LaunchSpec {
    /// Build a stdio spec from a shell-like command line (`"uvx mcp-server-time"`).
    ///
    /// The line is split on whitespace; quoting is not interpreted. Returns
    /// `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let command = parts.next()?;
        Some(Self::Stdio {
            command,
            args: parts.collect(),
            env: HashMap::new(),
            cwd: None,
        })
    }

    /// Build a streamable-HTTP spec.
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http { url: url.into() }
    }

    /// Short transport label (`stdio` / `http`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio { command, args, .. } => {
                write!(f, "{command}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Self::Http { url } => write!(f, "{url}"),
        }
    }
}

// ─── ServerDescriptor ────────────────────────────────────────────────────────

/// A known server in the catalog. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDescriptor {
    /// Unique key (case-insensitive within a catalog).
    pub name: String,
    pub launch: LaunchSpec,
    pub description: String,
    pub tags: BTreeSet<String>,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, launch: LaunchSpec, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            launch,
            description: description.into(),
            tags: BTreeSet::new(),
        }
    }

    /// Attach tags (builder style).
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Text used for semantic indexing: `"name: description (tag, tag)"`.
    pub fn search_text(&self) -> String {
        let mut text = format!("{}: {}", self.name, self.description);
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            text.push_str(&format!(" ({})", tags.join(", ")));
        }
        text
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
