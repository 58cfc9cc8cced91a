//! Wraps an MCP-advertised tool as a registry [`Tool`].

use async_trait::async_trait;
use planwright_core::error::ToolError;
use planwright_core::tool::{Tool, ToolContract, ToolInput, ToolOutput, ToolSource};
use std::sync::Arc;

use super::client::McpClient;
use super::protocol::McpToolDef;

/// Registry name of a server's tool.
pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

pub struct McpTool {
    full_name: String,
    definition: McpToolDef,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(definition: McpToolDef, client: Arc<McpClient>) -> Self {
        Self {
            full_name: qualified_name(client.name(), &definition.name),
            definition,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        self.definition.description.as_deref().unwrap_or("MCP tool")
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.definition.input_schema.clone()
    }

    /// Remote side effects are unknown, so MCP tools never auto-run and are
    /// never retried.
    fn contract(&self) -> ToolContract {
        ToolContract::new(self.parameters_schema()).may_block(true)
    }

    fn source(&self) -> ToolSource {
        ToolSource::Mcp {
            server: self.client.name().to_string(),
        }
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let result = self
            .client
            .call_tool(&self.definition.name, input.arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.full_name.clone(),
                reason: e.to_string(),
            })?;

        let text = result.text();
        if result.is_error {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.full_name.clone(),
                reason: text,
            });
        }
        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::tests::FakeChannel;

    fn client(tools: &[&str]) -> Arc<McpClient> {
        Arc::new(McpClient::with_channel("files", Box::new(FakeChannel::with_tools(tools))))
    }

    #[test]
    fn name_and_source_are_qualified() {
        let def = McpToolDef {
            name: "read".into(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        };
        let tool = McpTool::new(def, client(&["read"]));
        let descriptor = tool.descriptor();
        assert_eq!(descriptor.name, "mcp__files__read");
        assert_eq!(descriptor.source, ToolSource::Mcp { server: "files".into() });
        assert!(!descriptor.contract.auto_run);
        assert!(descriptor.contract.may_block);
    }

    #[tokio::test]
    async fn remote_error_becomes_tool_error() {
        let def = McpToolDef {
            name: "explode".into(),
            description: None,
            input_schema: serde_json::json!({}),
        };
        let tool = McpTool::new(def, client(&["explode"]));
        let err = tool.invoke(ToolInput::default()).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { reason, .. } if reason == "boom"));
    }
}
