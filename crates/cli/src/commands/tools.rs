//! `planwright tools` — List the tools a plan can use.

use planwright_config::AppConfig;
use planwright_core::{ToolDescriptor, ToolDiscovery, ToolSource};
use planwright_tools::{McpManager, builtin_registry};

pub async fn run(discover: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = builtin_registry(&config, None);

    if discover && !config.mcp_servers.is_empty() {
        let manager = McpManager::new();
        let found = manager.discover(&config.mcp_servers, &registry).await;
        println!("  Discovered {} tool(s) from {} MCP server(s)\n", found.len(), config.mcp_servers.len());
    }

    let tools = registry.list();
    println!("  {:<36} {:<16} {:<9} TIMEOUT", "NAME", "SOURCE", "AUTO-RUN");
    for tool in &tools {
        println!("{}", format_row(tool, &config));
    }
    println!("\n  {} tool(s) registered", tools.len());
    if !discover && !config.mcp_servers.is_empty() {
        println!("  Pass --discover to include tools from configured MCP servers.");
    }

    Ok(())
}

fn format_row(tool: &ToolDescriptor, config: &AppConfig) -> String {
    let source = match &tool.source {
        ToolSource::Builtin => "builtin".to_string(),
        ToolSource::Mcp { server } => format!("mcp:{server}"),
    };
    let timeout = config.agent.timeout_for(&tool.name, tool.contract.timeout_secs);
    format!(
        "  {:<36} {:<16} {:<9} {timeout}s",
        tool.name,
        source,
        if tool.contract.auto_run { "yes" } else { "no" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_shows_effective_timeout() {
        let mut config = AppConfig::default();
        config.agent.tool_timeouts.insert("web_search".into(), 15);
        let registry = builtin_registry(&config, None);
        let search = registry.list().into_iter().find(|d| d.name == "web_search").unwrap();
        let row = format_row(&search, &config);
        assert!(row.contains("builtin"));
        assert!(row.trim_end().ends_with("15s"));
    }
}
