pub mod doctor;
pub mod onboard;
pub mod run;
pub mod tools;

use planwright_config::AppConfig;
use planwright_core::Provider;
use std::sync::Arc;

/// Load the config, failing with setup instructions when no API key is set.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    PLANWRIGHT_API_KEY=sk-...   (generic)");
        eprintln!("    OPENAI_API_KEY=sk-...       (OpenAI)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }
    Ok(config)
}

pub fn default_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    let router = planwright_providers::build_from_config(config);
    router
        .default()
        .ok_or_else(|| format!("No provider named '{}' configured", config.default_provider).into())
}
