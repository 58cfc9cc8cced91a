//! Built-in tool implementations for Planwright.
//!
//! Tools are the capabilities a plan step can invoke: run Python code,
//! search the web, and look up or compute times. The [`mcp`] module adds
//! tools hosted by external MCP servers at runtime.

pub mod code_exec;
pub mod mcp;
pub mod time;
pub mod web_search;

use planwright_config::AppConfig;
use planwright_core::provider::Provider;
use planwright_core::tool::{Tool, ToolRegistry};
use std::sync::Arc;
use tracing::info;

pub use code_exec::{CodeExecutionTool, CodeGenerator};
pub use mcp::McpManager;
pub use time::{CurrentTimeTool, DateOffsetTool, TimeInfoTool};
pub use web_search::WebSearchTool;

/// Create a registry holding every enabled built-in tool.
///
/// `provider` backs code generation; without it `code_execution` only runs
/// code passed explicitly. `tools.auto_run_overrides` replaces the auto-run
/// flag of the named tools.
pub fn builtin_registry(config: &AppConfig, provider: Option<Arc<dyn Provider>>) -> ToolRegistry {
    let registry = ToolRegistry::new();
    for tool in builtin_tools(config, provider) {
        register_with_overrides(&registry, tool, config);
    }
    info!(count = registry.len(), "Built-in tools registered");
    registry
}

fn builtin_tools(config: &AppConfig, provider: Option<Arc<dyn Provider>>) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(CurrentTimeTool),
        Arc::new(DateOffsetTool),
        Arc::new(TimeInfoTool),
    ];

    if config.tools.code.enabled {
        let mut code = CodeExecutionTool::new(&config.tools.code.interpreter);
        if config.tools.code.generate_code {
            if let Some(provider) = provider {
                code = code.with_generator(CodeGenerator::new(provider, &config.default_model));
            }
        }
        tools.push(Arc::new(code));
    }

    if config.tools.search.enabled {
        tools.push(Arc::new(WebSearchTool::from_config(&config.tools.search)));
    }

    tools
}

/// Register `tool`, applying any configured auto-run override.
pub fn register_with_overrides(registry: &ToolRegistry, tool: Arc<dyn Tool>, config: &AppConfig) {
    let mut descriptor = tool.descriptor();
    if let Some(&auto_run) = config.tools.auto_run_overrides.get(&descriptor.name) {
        descriptor.contract.auto_run = auto_run;
    }
    registry.register_with_descriptor(descriptor, tool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_builtins() {
        let registry = builtin_registry(&AppConfig::default(), None);
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["code_execution", "current_time", "date_offset", "time_info", "web_search"]
        );
    }

    #[test]
    fn disabled_tools_are_skipped() {
        let mut config = AppConfig::default();
        config.tools.code.enabled = false;
        config.tools.search.enabled = false;
        let registry = builtin_registry(&config, None);
        assert!(!registry.contains("code_execution"));
        assert!(!registry.contains("web_search"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn auto_run_override_applies() {
        let mut config = AppConfig::default();
        config.tools.auto_run_overrides.insert("code_execution".into(), true);
        config.tools.auto_run_overrides.insert("web_search".into(), false);
        let registry = builtin_registry(&config, None);
        assert!(registry.resolve("code_execution").unwrap().descriptor.contract.auto_run);
        assert!(!registry.resolve("web_search").unwrap().descriptor.contract.auto_run);
    }
}
