//! Tool trait and registry — the capabilities a plan step can invoke.
//!
//! Every capability (code execution, search, time lookup, MCP-proxied tools)
//! implements [`Tool`]. The [`ToolRegistry`] maps names to registered tools
//! and is the only structure shared across concurrent requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::error::ToolError;
use crate::plan::StepId;
use crate::request::McpServerConfig;

/// The registered contract of a tool: what it accepts and how it behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContract {
    /// JSON Schema describing the tool's arguments.
    pub input_schema: serde_json::Value,

    /// Whether an invocation can block indefinitely without a timeout.
    #[serde(default)]
    pub may_block: bool,

    /// Whether the tool can be re-invoked safely after a failure.
    #[serde(default)]
    pub retry_safe: bool,

    /// Whether high-uncertainty steps may run this tool without confirmation.
    #[serde(default)]
    pub auto_run: bool,

    /// Per-tool timeout; the executor default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ToolContract {
    /// A conservative contract: not auto-run, not retry-safe, non-blocking.
    pub fn new(input_schema: serde_json::Value) -> Self {
        Self {
            input_schema,
            may_block: false,
            retry_safe: false,
            auto_run: false,
            timeout_secs: None,
        }
    }

    pub fn may_block(mut self, value: bool) -> Self {
        self.may_block = value;
        self
    }

    pub fn retry_safe(mut self, value: bool) -> Self {
        self.retry_safe = value;
        self
    }

    pub fn auto_run(mut self, value: bool) -> Self {
        self.auto_run = value;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Where a tool came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSource {
    Builtin,
    Mcp { server: String },
}

/// Name plus contract, as the executor and planner see a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub contract: ToolContract,
    pub source: ToolSource,
}

/// Output of a prior step that the current step depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyOutput {
    pub step_id: StepId,
    pub summary: String,
    pub output: String,
}

/// Everything a tool receives for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    /// The step goal, in natural language.
    pub goal: String,

    /// Planner-proposed arguments matching the tool's input schema.
    #[serde(default)]
    pub arguments: serde_json::Value,

    /// Outputs of the steps this one declared a dependency on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyOutput>,

    /// Free-text feedback supplied when the step was confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl ToolInput {
    pub fn new(goal: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            goal: goal.into(),
            arguments,
            dependencies: Vec::new(),
            feedback: None,
        }
    }

    /// A string argument, if present and non-empty.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// The successful result of a tool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Raw output, preserved verbatim.
    pub output: String,

    /// Short summary used by later steps; derived from `output` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            summary: None,
            data: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The core Tool trait.
///
/// Each capability implements this trait and is registered in the
/// [`ToolRegistry`]; the step executor resolves it by name at call time.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "code_execution", "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (shown to the planner).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Behavioral contract. Defaults to the conservative contract.
    fn contract(&self) -> ToolContract {
        ToolContract::new(self.parameters_schema())
    }

    fn source(&self) -> ToolSource {
        ToolSource::Builtin
    }

    /// Invoke the tool.
    async fn invoke(&self, input: ToolInput) -> std::result::Result<ToolOutput, ToolError>;

    /// The descriptor this tool registers under.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            contract: self.contract(),
            source: self.source(),
        }
    }
}

/// A descriptor bound to its implementation.
///
/// Handed out as `Arc<RegisteredTool>`: a resolved tool stays valid for the
/// whole invocation even if the name is re-registered meanwhile.
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub tool: Arc<dyn Tool>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// A registry of available tools.
///
/// Reads clone an `Arc` out of the map; writes swap the entry under the
/// write lock, so no reader observes a half-updated descriptor.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own descriptor. Replaces any existing tool
    /// with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) -> ToolDescriptor {
        let descriptor = tool.descriptor();
        self.register_with_descriptor(descriptor, tool)
    }

    /// Register a tool under an explicit descriptor (e.g. with a contract
    /// overridden from configuration).
    pub fn register_with_descriptor(
        &self,
        descriptor: ToolDescriptor,
        tool: Arc<dyn Tool>,
    ) -> ToolDescriptor {
        let entry = Arc::new(RegisteredTool {
            descriptor: descriptor.clone(),
            tool,
        });
        let replaced = self
            .tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.name.clone(), entry)
            .is_some();
        debug!(tool = %descriptor.name, replaced, "Tool registered");
        descriptor
    }

    /// Remove a tool by name. Returns whether it was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Remove every tool that came from the given MCP server.
    pub fn unregister_server(&self, server: &str) -> usize {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let before = tools.len();
        tools.retain(|_, t| {
            !matches!(&t.descriptor.source, ToolSource::Mcp { server: s } if s == server)
        });
        before - tools.len()
    }

    /// Resolve a tool by name.
    pub fn resolve(&self, name: &str) -> std::result::Result<Arc<RegisteredTool>, ToolError> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Snapshot of all descriptors, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adds externally-hosted tools to a registry at runtime.
///
/// Discovery failures are the implementor's to log; callers only learn
/// which descriptors were registered.
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    async fn discover(
        &self,
        servers: &[McpServerConfig],
        registry: &ToolRegistry,
    ) -> Vec<ToolDescriptor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool {
        prefix: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn invoke(&self, input: ToolInput) -> std::result::Result<ToolOutput, ToolError> {
            let text = input.str_arg("text").unwrap_or("");
            Ok(ToolOutput::text(format!("{}{}", self.prefix, text)))
        }
    }

    #[test]
    fn registry_register_and_resolve() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { prefix: "" }));
        assert!(registry.resolve("echo").is_ok());
        assert!(matches!(
            registry.resolve("nonexistent"),
            Err(ToolError::NotFound(name)) if name == "nonexistent"
        ));
    }

    #[test]
    fn default_contract_is_conservative() {
        let descriptor = EchoTool { prefix: "" }.descriptor();
        assert!(!descriptor.contract.auto_run);
        assert!(!descriptor.contract.retry_safe);
        assert_eq!(descriptor.source, ToolSource::Builtin);
    }

    #[test]
    fn re_registering_same_contract_is_idempotent() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { prefix: "" }));
        let first = registry.resolve("echo").unwrap().descriptor.clone();
        registry.register(Arc::new(EchoTool { prefix: "" }));
        let second = registry.resolve("echo").unwrap().descriptor.clone();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn resolved_tool_survives_replacement() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { prefix: "old:" }));
        let resolved = registry.resolve("echo").unwrap();

        registry.register(Arc::new(EchoTool { prefix: "new:" }));

        let input = ToolInput::new("echo", serde_json::json!({"text": "hi"}));
        let out = resolved.tool.invoke(input.clone()).await.unwrap();
        assert_eq!(out.output, "old:hi");

        let fresh = registry.resolve("echo").unwrap();
        assert_eq!(fresh.tool.invoke(input).await.unwrap().output, "new:hi");
    }

    #[test]
    fn unregister_by_server() {
        let registry = ToolRegistry::new();
        let tool: Arc<dyn Tool> = Arc::new(EchoTool { prefix: "" });
        let mut descriptor = tool.descriptor();
        descriptor.name = "mcp__files__read".into();
        descriptor.source = ToolSource::Mcp { server: "files".into() };
        registry.register_with_descriptor(descriptor, tool.clone());
        registry.register(tool);

        assert_eq!(registry.unregister_server("files"), 1);
        assert_eq!(registry.list().len(), 1);
        assert!(registry.unregister("echo"));
        assert!(registry.is_empty());
    }

    #[test]
    fn list_is_sorted_snapshot() {
        struct Named(&'static str);
        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str { self.0 }
            fn description(&self) -> &str { "named" }
            fn parameters_schema(&self) -> serde_json::Value { serde_json::json!({}) }
            async fn invoke(&self, _input: ToolInput) -> std::result::Result<ToolOutput, ToolError> {
                Ok(ToolOutput::default())
            }
        }

        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("zeta")));
        registry.register(Arc::new(Named("alpha")));
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
