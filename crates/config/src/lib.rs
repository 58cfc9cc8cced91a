//! Configuration loading, validation, and management for Planwright.
//!
//! Loads configuration from `~/.planwright/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use planwright_core::McpServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.planwright/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used for planning calls; falls back to `default_model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_model: Option<String>,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Loop controller settings
    #[serde(default)]
    pub agent: LoopConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// MCP servers connected for every request
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mcp_servers: Vec<&str> = self.mcp_servers.iter().map(|s| s.name.as_str()).collect();
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("planner_model", &self.planner_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("logging", &self.logging)
            .field("mcp_servers", &mcp_servers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// When a failed step sends the loop back to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanPolicy {
    /// Every failure triggers a re-plan.
    #[default]
    AnyFailure,
    /// Only failures that later steps depend on.
    BlockedDependents,
}

/// Loop controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Re-plan attempts allowed per request before aborting
    #[serde(default = "default_replan_cap")]
    pub replan_cap: u32,

    /// Uncertainty above which a non-auto-run step needs confirmation
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: f32,

    #[serde(default = "default_tool_timeout_secs")]
    pub default_tool_timeout_secs: u64,

    /// Per-tool timeout overrides
    #[serde(default)]
    pub tool_timeouts: HashMap<String, u64>,

    #[serde(default)]
    pub replan_policy: ReplanPolicy,

    /// Capacity of the per-request event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Bound on the reasoning-backend probe in the health query
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

fn default_replan_cap() -> u32 {
    3
}
fn default_confirmation_threshold() -> f32 {
    0.7
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_event_buffer() -> usize {
    64
}
fn default_health_timeout_secs() -> u64 {
    5
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            replan_cap: default_replan_cap(),
            confirmation_threshold: default_confirmation_threshold(),
            default_tool_timeout_secs: default_tool_timeout_secs(),
            tool_timeouts: HashMap::new(),
            replan_policy: ReplanPolicy::default(),
            event_buffer: default_event_buffer(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

impl LoopConfig {
    /// Timeout for `tool`: config override, then the tool's own contract,
    /// then the default.
    pub fn timeout_for(&self, tool: &str, contract_secs: Option<u64>) -> u64 {
        self.tool_timeouts
            .get(tool)
            .copied()
            .or(contract_secs)
            .unwrap_or(self.default_tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub code: CodeToolConfig,

    #[serde(default)]
    pub search: SearchToolConfig,

    /// Force a tool's auto-run flag on or off
    #[serde(default)]
    pub auto_run_overrides: HashMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Generate code from the step goal when no code argument is given
    #[serde(default = "default_true")]
    pub generate_code: bool,
}

fn default_interpreter() -> String {
    "python3".into()
}

impl Default for CodeToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: default_interpreter(),
            generate_code: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".into()
}
fn default_max_results() -> usize {
    3
}

impl Default for SearchToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tavily_api_key: None,
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
        }
    }
}

impl std::fmt::Debug for SearchToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchToolConfig")
            .field("enabled", &self.enabled)
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.planwright/config.toml).
    ///
    /// Also checks environment variables:
    /// - `PLANWRIGHT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `PLANWRIGHT_PROVIDER`, `PLANWRIGHT_MODEL`
    /// - `TAVILY_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("PLANWRIGHT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(provider) = std::env::var("PLANWRIGHT_PROVIDER") {
            self.default_provider = provider;
        }
        if let Ok(model) = std::env::var("PLANWRIGHT_MODEL") {
            self.default_model = model;
        }
        if self.tools.search.tavily_api_key.is_none() {
            self.tools.search.tavily_api_key = std::env::var("TAVILY_API_KEY").ok();
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".planwright")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.agent.confirmation_threshold) {
            return Err(ConfigError::ValidationError(
                "agent.confirmation_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.agent.replan_cap == 0 {
            return Err(ConfigError::ValidationError(
                "agent.replan_cap must be at least 1".into(),
            ));
        }

        if self.agent.default_tool_timeout_secs == 0
            || self.agent.tool_timeouts.values().any(|&t| t == 0)
        {
            return Err(ConfigError::ValidationError(
                "tool timeouts must be > 0".into(),
            ));
        }

        if self.agent.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "agent.event_buffer must be > 0".into(),
            ));
        }

        for server in &self.mcp_servers {
            server.validate().map_err(ConfigError::ValidationError)?;
        }

        Ok(())
    }

    /// The model used for planning calls.
    pub fn planner_model(&self) -> &str {
        self.planner_model.as_deref().unwrap_or(&self.default_model)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            planner_model: None,
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            agent: LoopConfig::default(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig::default(),
            mcp_servers: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
