//! Connects configured MCP servers and registers their tools.

use async_trait::async_trait;
use planwright_core::{McpServerConfig, ToolDescriptor, ToolDiscovery, ToolRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::McpError;
use super::client::McpClient;
use super::tool::McpTool;

/// Keeps one live client per server name, shared across requests.
#[derive(Default)]
pub struct McpManager {
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connected client for `config`, reusing a live one with the same name.
    pub async fn connect(&self, config: &McpServerConfig) -> Result<Arc<McpClient>, McpError> {
        let existing = self.clients.read().await.get(&config.name).cloned();
        if let Some(existing) = existing {
            if existing.is_alive().await {
                return Ok(existing);
            }
        }

        let client = McpClient::connect(config).await?;
        client.initialize().await?;
        client.list_tools().await?;

        let client = Arc::new(client);
        self.clients
            .write()
            .await
            .insert(config.name.clone(), Arc::clone(&client));
        info!(server = %config.name, transport = ?config.transport(), "Connected to MCP server");
        Ok(client)
    }

    /// Register every tool of a connected client, replacing previous entries.
    pub async fn register_tools(client: &Arc<McpClient>, registry: &ToolRegistry) -> Vec<ToolDescriptor> {
        registry.unregister_server(client.name());
        client
            .cached_tools()
            .await
            .into_iter()
            .map(|def| registry.register(Arc::new(McpTool::new(def, Arc::clone(client)))))
            .collect()
    }

    pub async fn disconnect(&self, name: &str, registry: &ToolRegistry) {
        if self.clients.write().await.remove(name).is_some() {
            let removed = registry.unregister_server(name);
            info!(server = %name, removed, "Disconnected MCP server");
        }
    }

    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ToolDiscovery for McpManager {
    async fn discover(&self, servers: &[McpServerConfig], registry: &ToolRegistry) -> Vec<ToolDescriptor> {
        let attempts = servers.iter().map(|config| async move {
            (config.name.as_str(), self.connect(config).await)
        });

        let mut registered = Vec::new();
        for (name, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(client) => registered.extend(Self::register_tools(&client, registry).await),
                Err(e) => warn!(server = %name, error = %e, "MCP discovery failed"),
            }
        }
        registered
    }
}
