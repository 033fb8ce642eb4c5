//! Default connector: stdio child processes and streamable-HTTP endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::McpError;
use super::http::HttpTransport;
use super::stdio::spawn_stdio;
use super::transport::{Connector, Transport};
use crate::catalog::{LaunchSpec, ServerDescriptor};

/// Launches transports for catalog servers.
#[derive(Debug, Clone)]
pub struct McpConnector {
    /// Default working directory for stdio servers without their own `cwd`.
    working_dir: Option<PathBuf>,
    http: HttpClient,
}

impl McpConnector {
    pub fn new(working_dir: Option<PathBuf>) -> Result<Self, McpError> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| McpError::SpawnFailed {
                name: "http".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { working_dir, http })
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn launch(&self, server: &ServerDescriptor) -> Result<Arc<dyn Transport>, McpError> {
        match &server.launch {
            LaunchSpec::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                // Per-server cwd overrides the connector default.
                let dir = cwd.as_deref().map(Path::new).or(self.working_dir.as_deref());
                let transport = spawn_stdio(&server.name, command, args, env, dir)?;
                Ok(Arc::new(transport))
            }
            LaunchSpec::Http { url } => {
                Ok(Arc::new(HttpTransport::new(&server.name, url, self.http.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_reports_missing_binary() {
        let connector = McpConnector::new(None).unwrap();
        let server = ServerDescriptor::new(
            "ghost",
            LaunchSpec::from_command_line("no-such-mcp-server-binary --flag").unwrap(),
            "never starts",
        );
        match connector.launch(&server).await {
            Err(McpError::SpawnFailed { name, .. }) => assert_eq!(name, "ghost"),
            Err(other) => panic!("expected SpawnFailed, got {other:?}"),
            Ok(_) => panic!("expected launch failure"),
        }
    }

    #[tokio::test]
    async fn test_http_launch_is_lazy() {
        let connector = McpConnector::new(None).unwrap();
        let server = ServerDescriptor::new(
            "remote",
            LaunchSpec::http("http://127.0.0.1:9/mcp"),
            "remote server",
        );
        let transport = connector.launch(&server).await.unwrap();
        assert_eq!(transport.server_name(), "remote");
        assert!(transport.is_multiplexed());
    }
}
