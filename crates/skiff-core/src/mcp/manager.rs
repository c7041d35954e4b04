//! MCP Manager - owns every configured server connection
//!
//! Servers connect concurrently and independently; one failing never affects
//! the others. Tools from ready servers are exposed under `server__tool`.

use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::{ConnectionState, McpClient};
use super::config::{McpConfig, McpServerConfig};
use super::error::McpError;
use super::protocol::{McpToolDef, McpToolResult};
use super::tool::McpTool;
use super::transport::Transport;
use crate::ai::types::AiTool;
use crate::tools::registry::NAMESPACE_SEPARATOR;

/// Server snapshot for display
#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub transport: &'static str,
    pub state: ConnectionState,
    pub tools: Vec<McpToolDef>,
}

/// One namespaced tool in the catalog
#[derive(Debug, Clone)]
pub struct McpCatalogEntry {
    pub full_name: String,
    pub server: String,
    pub tool: McpToolDef,
}

/// Build the exposed name for a server's tool
pub fn namespaced_name(server: &str, tool: &str) -> String {
    format!("{}{}{}", server, NAMESPACE_SEPARATOR, tool)
}

/// MCP Manager
pub struct McpManager {
    /// Clients by server name, including failed ones
    clients: RwLock<BTreeMap<String, Arc<McpClient>>>,
    /// Working directory for spawned servers
    working_dir: PathBuf,
}

impl McpManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            working_dir,
        }
    }

    /// Load .mcp.json from the working directory and connect everything in it
    pub async fn load_and_connect(&self) -> anyhow::Result<usize> {
        let config = McpConfig::load(&self.working_dir).await?;
        Ok(self.connect_all(config.servers).await)
    }

    /// Connect to all servers in parallel, returning how many became ready
    pub async fn connect_all(&self, configs: Vec<McpServerConfig>) -> usize {
        if configs.is_empty() {
            return 0;
        }

        info!("Connecting to {} MCP servers in parallel", configs.len());

        let results = join_all(configs.into_iter().map(|config| async move {
            let name = config.name.clone();
            (name, self.add_server(config).await)
        }))
        .await;

        let mut ready = 0;
        for (name, result) in results {
            match result {
                Ok(()) => ready += 1,
                Err(e) => warn!("Failed to connect to MCP server {}: {}", name, e),
            }
        }
        ready
    }

    /// Add a server and connect it. A server with the same name is replaced.
    ///
    /// The server stays listed even when connecting fails, so its state can be shown.
    pub async fn add_server(&self, config: McpServerConfig) -> Result<(), McpError> {
        let client = self.install(config).await;
        client.connect(&self.working_dir).await
    }

    /// Add a server over an already open transport
    pub async fn add_server_with_transport(
        &self,
        config: McpServerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<(), McpError> {
        let client = self.install(config).await;
        client.connect_with(transport).await
    }

    async fn install(&self, config: McpServerConfig) -> Arc<McpClient> {
        if config.name.contains(NAMESPACE_SEPARATOR) {
            warn!(
                "MCP server name '{}' contains '{}'; its tool names may be ambiguous",
                config.name, NAMESPACE_SEPARATOR
            );
        }

        let client = Arc::new(McpClient::new(config));
        let previous = self
            .clients
            .write()
            .await
            .insert(client.name().to_string(), client.clone());
        if let Some(previous) = previous {
            info!("Replacing MCP server {}", previous.name());
            previous.close().await;
        }
        client
    }

    /// Disconnect and forget a server
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        let client = self.clients.write().await.remove(name);
        match client {
            Some(client) => {
                client.close().await;
                info!("Removed MCP server {}", name);
                Ok(())
            }
            None => Err(McpError::UnknownServer(name.to_string())),
        }
    }

    /// Snapshot of every known server, ordered by name
    pub async fn servers(&self) -> Vec<McpServerInfo> {
        self.clients
            .read()
            .await
            .values()
            .map(|client| McpServerInfo {
                name: client.name().to_string(),
                transport: client.config().transport.kind(),
                state: client.state(),
                tools: client.tools(),
            })
            .collect()
    }

    pub async fn state(&self, name: &str) -> Option<ConnectionState> {
        self.clients.read().await.get(name).map(|c| c.state())
    }

    /// Tools of every ready server, namespaced as `server__tool`
    ///
    /// Servers are visited in name order; a name that collides with one
    /// already in the catalog is skipped.
    pub async fn catalog(&self) -> Vec<McpCatalogEntry> {
        let clients = self.clients.read().await;
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for client in clients.values() {
            if !client.state().is_ready() {
                continue;
            }
            for tool in client.tools() {
                let full_name = namespaced_name(client.name(), &tool.name);
                if !seen.insert(full_name.clone()) {
                    warn!("Skipping duplicate MCP tool name {}", full_name);
                    continue;
                }
                entries.push(McpCatalogEntry {
                    full_name,
                    server: client.name().to_string(),
                    tool,
                });
            }
        }
        entries
    }

    /// Catalog as model-facing tool definitions
    pub async fn ai_tools(&self) -> Vec<AiTool> {
        self.catalog()
            .await
            .into_iter()
            .map(|entry| AiTool {
                name: entry.full_name,
                description: entry
                    .tool
                    .description
                    .unwrap_or_else(|| format!("Tool from MCP server {}", entry.server)),
                input_schema: entry.tool.input_schema,
            })
            .collect()
    }

    /// Look up a namespaced tool
    pub async fn resolve(&self, full_name: &str) -> Option<McpTool> {
        let entry = self
            .catalog()
            .await
            .into_iter()
            .find(|e| e.full_name == full_name)?;
        let client = self.clients.read().await.get(&entry.server).cloned()?;
        Some(McpTool::new(entry.full_name, entry.tool, client))
    }

    /// Call a tool on a specific server
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<McpToolResult, McpError> {
        let client = self
            .clients
            .read()
            .await
            .get(server)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(server.to_string()))?;
        client.call_tool(tool, arguments).await
    }

    /// Close every connection
    pub async fn shutdown(&self) {
        let clients: Vec<_> = std::mem::take(&mut *self.clients.write().await)
            .into_values()
            .collect();
        join_all(clients.iter().map(|c| c.close())).await;
        info!("MCP manager shut down ({} servers)", clients.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::mock::{mock_pair, text_result};
    use crate::tools::registry::{Tool, ToolCategory, ToolContext};
    use serde_json::json;
    use std::time::Duration;

    fn tools(names: &[&str]) -> Value {
        Value::Array(
            names
                .iter()
                .map(|n| json!({"name": n, "description": format!("{} tool", n), "inputSchema": {"type": "object"}}))
                .collect(),
        )
    }

    async fn add_mock(manager: &McpManager, name: &str, tool_names: &[&str]) {
        let (transport, server) = mock_pair();
        server.spawn_with(tools(tool_names), |name, args| {
            Ok(text_result(&format!("{}:{}", name, args)))
        });
        manager
            .add_server_with_transport(
                McpServerConfig::stdio(name, "unused", vec![]),
                Arc::new(transport),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_server_does_not_affect_others() {
        let manager = McpManager::new(std::env::temp_dir());
        add_mock(&manager, "files", &["read", "list"]).await;

        let (transport, mut server) = mock_pair();
        tokio::spawn(async move {
            let init = server.next_request().await.unwrap();
            server.reply_error(&init["id"], -32000, "unsupported protocol");
            server
        });
        let result = manager
            .add_server_with_transport(
                McpServerConfig::stdio("broken", "unused", vec![]),
                Arc::new(transport),
            )
            .await;
        assert!(result.is_err());

        let servers = manager.servers().await;
        assert_eq!(servers.len(), 2);
        assert!(matches!(servers[0].state, ConnectionState::Failed(_)));
        assert_eq!(servers[1].state, ConnectionState::Ready);

        let names: Vec<_> = manager
            .catalog()
            .await
            .into_iter()
            .map(|e| e.full_name)
            .collect();
        assert_eq!(names, vec!["files__read", "files__list"]);

        let result = manager
            .call_tool("files", "read", json!({"path": "a"}))
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_connect_all_with_missing_command() {
        let manager = McpManager::new(std::env::temp_dir());
        let ready = manager
            .connect_all(vec![McpServerConfig::stdio(
                "ghost",
                "skiff-definitely-not-a-command",
                vec![],
            )])
            .await;
        assert_eq!(ready, 0);
        assert!(matches!(
            manager.state("ghost").await,
            Some(ConnectionState::Failed(_))
        ));
        assert!(manager.catalog().await.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_skips_colliding_names() {
        let manager = McpManager::new(std::env::temp_dir());
        // "a__b" + "c" and "a" + "b__c" both namespace to "a__b__c"
        add_mock(&manager, "a", &["b__c"]).await;
        add_mock(&manager, "a__b", &["c"]).await;

        let catalog = manager.catalog().await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].server, "a");
        assert_eq!(manager.ai_tools().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_and_execute_namespaced_tool() {
        let manager = McpManager::new(std::env::temp_dir());
        add_mock(&manager, "search", &["query"]).await;

        assert!(manager.resolve("search__missing").await.is_none());
        let tool = manager.resolve("search__query").await.unwrap();
        assert_eq!(tool.name(), "search__query");
        assert_eq!(tool.remote_name(), "query");
        assert_eq!(tool.category(&json!({})), ToolCategory::ReadOnly);

        let result = tool
            .execute(json!({"q": "rust"}), &ToolContext::default())
            .await;
        assert!(result.success);
        assert_eq!(result.output.unwrap(), r#"query:{"q":"rust"}"#);
    }

    #[tokio::test]
    async fn test_require_confirmation_marks_tools_mutating() {
        let manager = McpManager::new(std::env::temp_dir());
        let (transport, server) = mock_pair();
        server.spawn_with(tools(&["deploy"]), |_, _| Ok(text_result("done")));
        manager
            .add_server_with_transport(
                McpServerConfig::stdio("ops", "unused", vec![]).with_confirmation(true),
                Arc::new(transport),
            )
            .await
            .unwrap();

        let tool = manager.resolve("ops__deploy").await.unwrap();
        assert!(matches!(tool.category(&json!({})), ToolCategory::Mutating(_)));
    }

    #[tokio::test]
    async fn test_remove_and_shutdown() {
        let manager = McpManager::new(std::env::temp_dir());
        add_mock(&manager, "one", &["x"]).await;
        add_mock(&manager, "two", &["y"]).await;

        manager.remove_server("one").await.unwrap();
        assert!(matches!(
            manager.remove_server("one").await,
            Err(McpError::UnknownServer(_))
        ));
        assert_eq!(manager.servers().await.len(), 1);

        manager.shutdown().await;
        assert!(manager.servers().await.is_empty());
        assert!(manager.call_tool("two", "y", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_rejects_in_flight_call() {
        let manager = Arc::new(McpManager::new(std::env::temp_dir()));
        let (transport, mut server) = mock_pair();
        let server_task = tokio::spawn(async move {
            server.handshake(tools(&["wait"])).await;
            let _call = server.next_request().await.unwrap();
            server
        });
        manager
            .add_server_with_transport(
                McpServerConfig::stdio("slow", "unused", vec![])
                    .with_request_timeout(Duration::from_secs(30)),
                Arc::new(transport),
            )
            .await
            .unwrap();

        let call = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.call_tool("slow", "wait", json!({})).await })
        };
        let _server = server_task.await.unwrap();

        manager.remove_server("slow").await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("in-flight call should end when its server is removed")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed(_)), "got {:?}", err);
    }
}
