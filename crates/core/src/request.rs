//! Request, MCP server and confirmation types exchanged with the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::message::Message;
use crate::plan::StepId;

/// One user turn handed to the loop controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub message: String,

    /// Prior turns, oldest first.
    #[serde(default)]
    pub conversation_history: Vec<Message>,

    /// Tool servers to discover before planning.
    #[serde(default)]
    pub mcp_configs: Vec<McpServerConfig>,
}

impl AgentRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_mcp(mut self, config: McpServerConfig) -> Self {
        self.mcp_configs.push(config);
        self
    }
}

/// How to reach an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransportKind {
    Stdio,
    StreamableHttp,
    Websocket,
}

/// Configuration of one external tool server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,

    /// Server URL; its scheme selects the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Explicit transport, used when `url` is absent or has no known scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<McpTransportKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Bearer token sent with HTTP requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl McpServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// The transport to use: `ws(s)://` is websocket, `http(s)://` is
    /// streamable HTTP, anything else falls back to `connection_type` or stdio.
    pub fn transport(&self) -> McpTransportKind {
        match self.url.as_deref() {
            Some(url) if url.starts_with("wss://") || url.starts_with("ws://") => {
                McpTransportKind::Websocket
            }
            Some(url) if url.starts_with("https://") || url.starts_with("http://") => {
                McpTransportKind::StreamableHttp
            }
            _ => self.connection_type.unwrap_or(McpTransportKind::Stdio),
        }
    }

    /// Check the fields the selected transport needs.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("MCP server name must not be empty".into());
        }
        match self.transport() {
            McpTransportKind::Stdio if self.command.is_none() => {
                Err(format!("MCP server '{}': stdio transport requires a command", self.name))
            }
            McpTransportKind::StreamableHttp | McpTransportKind::Websocket if self.url.is_none() => {
                Err(format!("MCP server '{}': network transport requires a url", self.name))
            }
            _ => Ok(()),
        }
    }
}

/// The caller's decision on a suspended step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationDecision {
    Approve,
    Reject,
    Modify,
}

/// Correlates a decision back to a suspended step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub step_id: StepId,
    pub decision: ConfirmationDecision,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_goal: Option<String>,

    /// Replacement tool for `modify`; `"none"` makes the step tool-free.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_tool: Option<String>,

    /// Free-text feedback forwarded to the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl ConfirmationResponse {
    pub fn approve(step_id: StepId) -> Self {
        Self {
            step_id,
            decision: ConfirmationDecision::Approve,
            modified_goal: None,
            modified_tool: None,
            feedback: None,
        }
    }

    pub fn reject(step_id: StepId) -> Self {
        Self {
            decision: ConfirmationDecision::Reject,
            ..Self::approve(step_id)
        }
    }

    pub fn modify(step_id: StepId, goal: impl Into<String>) -> Self {
        Self {
            decision: ConfirmationDecision::Modify,
            modified_goal: Some(goal.into()),
            ..Self::approve(step_id)
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}

/// What the caller sees while a step awaits confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationProposal {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub arguments: serde_json::Value,
    pub uncertainty: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,
    /// 1-based position of the step in the current plan.
    pub position: usize,
    pub total_steps: usize,
}
