//! `planwright doctor` — Diagnose configuration and dependencies.

use planwright_agent::{Orchestrator, controller_from_config};
use planwright_config::AppConfig;
use planwright_tools::builtin_registry;
use std::sync::Arc;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Planwright Doctor — System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file — run `planwright onboard` (using defaults)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  {} issue(s) found. See above for details.", issues + 1);
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key configured — set PLANWRIGHT_API_KEY or add api_key to config.toml");
        issues += 1;
    }

    if config.tools.code.enabled {
        let interpreter = &config.tools.code.interpreter;
        match tokio::process::Command::new(interpreter).arg("--version").output().await {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout);
                let version = if version.trim().is_empty() {
                    String::from_utf8_lossy(&out.stderr).trim().to_string()
                } else {
                    version.trim().to_string()
                };
                println!("  ✅ Interpreter: {version}");
            }
            _ => {
                println!("  ❌ Interpreter `{interpreter}` not found — code_execution steps will fail");
                issues += 1;
            }
        }
    }

    if config.tools.search.enabled && config.tools.search.tavily_api_key.is_none() {
        println!("  ⚠️  web_search enabled without TAVILY_API_KEY");
        issues += 1;
    }

    for server in &config.mcp_servers {
        println!("  ·  MCP server '{}' ({:?})", server.name, server.transport());
    }

    match super::default_provider(&config) {
        Ok(provider) => {
            let registry = Arc::new(builtin_registry(&config, Some(Arc::clone(&provider))));
            let controller = controller_from_config(&config, Arc::clone(&provider), registry);
            let report = Orchestrator::new(controller, provider).health().await;
            if report.backend_reachable {
                println!("  ✅ Reasoning backend reachable");
            } else {
                println!("  ❌ Reasoning backend unreachable");
                issues += 1;
            }
            println!("  ✅ {} tool(s) registered", report.tools_registered);
        }
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
