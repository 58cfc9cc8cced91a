//! A connection to one MCP server.

use planwright_core::{McpServerConfig, McpTransportKind};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::McpError;
use super::protocol::{
    InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, McpToolDef,
    ToolCallParams, ToolCallResult, ToolsListResult,
};
use super::transport::{HttpChannel, RpcChannel, StdioChannel};

const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

pub struct McpClient {
    name: String,
    channel: Box<dyn RpcChannel>,
    next_id: AtomicI64,
    tools: RwLock<Vec<McpToolDef>>,
}

impl McpClient {
    /// Open the transport the config selects. Does not handshake.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        config.validate().map_err(McpError::InvalidConfig)?;

        let channel: Box<dyn RpcChannel> = match config.transport() {
            McpTransportKind::Stdio => {
                let command = config
                    .command
                    .as_deref()
                    .ok_or_else(|| McpError::InvalidConfig("missing command".into()))?;
                Box::new(StdioChannel::spawn(&config.name, command, &config.args, &config.env).await?)
            }
            McpTransportKind::StreamableHttp => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| McpError::InvalidConfig("missing url".into()))?;
                Box::new(HttpChannel::new(url, config.token.clone()))
            }
            McpTransportKind::Websocket => {
                return Err(McpError::UnsupportedTransport("websocket".into()));
            }
        };

        Ok(Self::with_channel(&config.name, channel))
    }

    pub fn with_channel(name: &str, channel: Box<dyn RpcChannel>) -> Self {
        Self {
            name: name.to_string(),
            channel,
            next_id: AtomicI64::new(1),
            tools: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handshake: `initialize` followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::planwright())?;
        let result: InitializeResult = self
            .request("initialize", Some(params), Some(handshake_timeout()))
            .await?;

        info!(
            server = %self.name,
            protocol = %result.protocol_version,
            remote = result.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            "MCP server initialized"
        );

        self.channel
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let result: ToolsListResult = self
            .request("tools/list", None, Some(handshake_timeout()))
            .await?;
        info!(server = %self.name, count = result.tools.len(), "MCP tools listed");
        *self.tools.write().await = result.tools.clone();
        Ok(result.tools)
    }

    /// Invoke a tool. Unbounded here; the step executor owns the timeout.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = ToolCallParams {
            name: tool.to_string(),
            arguments: if arguments.is_null() { None } else { Some(arguments) },
        };
        debug!(server = %self.name, tool = %tool, "MCP tools/call");
        self.request("tools/call", Some(serde_json::to_value(params)?), None)
            .await
    }

    pub async fn cached_tools(&self) -> Vec<McpToolDef> {
        self.tools.read().await.clone()
    }

    pub async fn is_alive(&self) -> bool {
        self.channel.is_alive().await
    }

    async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<R, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let value = self
            .channel
            .call(JsonRpcRequest::new(id, method, params), timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn handshake_timeout() -> Duration {
    Duration::from_secs(HANDSHAKE_TIMEOUT_SECS)
}
