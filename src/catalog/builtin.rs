//! Curated list of popular MCP servers that can be run locally.

use super::descriptor::{LaunchSpec, ServerDescriptor};

/// `(name, command line, description, tags)` for every built-in server.
const CURATED: &[(&str, &str, &str, &[&str])] = &[
    (
        "fetch",
        "uvx mcp-server-fetch",
        "Fetch webpages and return Markdown, HTML, or plain text.",
        &["web", "http"],
    ),
    (
        "sqlite",
        "uvx mcp-server-sqlite --db-path ./db.sqlite",
        "Query and manage SQLite databases.",
        &["database", "sql"],
    ),
    (
        "time",
        "uvx mcp-server-time",
        "Get current time and convert time zones.",
        &["clock", "timezone"],
    ),
    (
        "filesystem",
        "npx --yes @modelcontextprotocol/server-filesystem .",
        "Browse and edit local files (limited to project directory).",
        &["files", "local"],
    ),
    (
        "github",
        "uvx mcp-server-github",
        "Interact with GitHub repositories, issues, and pull requests.",
        &["git", "code"],
    ),
    (
        "brave-search",
        "uvx mcp-server-brave-search",
        "Search the web using Brave Search API.",
        &["web", "search"],
    ),
    (
        "slack",
        "uvx mcp-server-slack",
        "Interact with Slack workspaces, channels, and messages.",
        &["chat", "messaging"],
    ),
    (
        "chargebee",
        "npx -y @chargebee/mcp@latest",
        "Interact with Chargebee billing and subscription management platform.",
        &["billing"],
    ),
    (
        "puppeteer",
        "npx --yes @modelcontextprotocol/server-puppeteer",
        "Control a headless browser to interact with web pages, take screenshots, and scrape content.",
        &["browser", "web"],
    ),
    (
        "memory",
        "npx --yes @modelcontextprotocol/server-memory",
        "Store and retrieve information across conversations using vector search.",
        &["memory", "knowledge"],
    ),
    (
        "dollhousemcpofficial",
        "npx --yes @dollhousemcp/mcp-server",
        "MCP server: DollhouseMCPofficial",
        &[],
    ),
    (
        "postgresql mcp",
        "npx --yes mcp-server-postgresql",
        "MCP server: PostgreSQL MCP",
        &["database", "sql"],
    ),
];

/// Return the curated server list in its canonical order.
pub fn curated_servers() -> Vec<ServerDescriptor> {
    CURATED
        .iter()
        .filter_map(|(name, command, description, tags)| {
            let launch = LaunchSpec::from_command_line(command)?;
            Some(ServerDescriptor::new(*name, launch, *description).with_tags(tags.iter().copied()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curated_list_is_complete_and_unique() {
        let servers = curated_servers();
        assert_eq!(servers.len(), CURATED.len());

        let mut names: Vec<String> = servers.iter().map(|s| s.name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), servers.len(), "built-in names must be unique");
    }

    #[test]
    fn test_curated_servers_are_stdio() {
        assert!(curated_servers()
            .iter()
            .all(|s| matches!(s.launch, LaunchSpec::Stdio { .. })));
    }
}
