//! Configuration loading, validation, and management for HookClaw.
//!
//! Loads configuration from `~/.hookclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.hookclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model used for the main iteration loop
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used for the one-shot plan phase
    #[serde(default = "default_planner_model")]
    pub planner_model: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Workspace directory (bootstrap prompt files, tool working dir)
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Iteration loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-opus-4-5".into()
}
fn default_planner_model() -> String {
    "deepseek/deepseek-reasoner".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_workspace() -> String {
    "~/.hookclaw/workspace".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("planner_model", &self.planner_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("workspace", &self.workspace)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Round cap for a normal turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Round cap when the input starts with `think_harder_marker`
    #[serde(default = "default_think_harder_iterations")]
    pub think_harder_iterations: u32,

    #[serde(default = "default_think_harder_marker")]
    pub think_harder_marker: String,

    /// How many stored session messages are replayed into each turn
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_max_tool_iterations() -> u32 {
    20
}
fn default_think_harder_iterations() -> u32 {
    50
}
fn default_think_harder_marker() -> String {
    "好好想想".into()
}
fn default_history_limit() -> usize {
    50
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            think_harder_iterations: default_think_harder_iterations(),
            think_harder_marker: default_think_harder_marker(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub exec: ExecToolConfig,

    #[serde(default)]
    pub logging: ToolLoggingConfig,
}

/// Shell exec tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecToolConfig {
    #[serde(default = "default_exec_timeout")]
    pub timeout_secs: u64,

    /// Block commands that reference paths outside the workspace
    #[serde(default)]
    pub restrict_to_workspace: bool,
}

fn default_exec_timeout() -> u64 {
    60
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exec_timeout(),
            restrict_to_workspace: false,
        }
    }
}

/// Tool usage logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLoggingConfig {
    /// Write one JSONL record per tool call
    #[serde(default)]
    pub enabled: bool,

    /// Also publish a notice to the originating chat
    #[serde(default)]
    pub notify_channel: bool,

    /// The notice is an empty message (a typing indicator) instead of a summary
    #[serde(default = "default_true")]
    pub typing_only: bool,

    #[serde(default = "default_log_file_prefix")]
    pub log_file_prefix: String,

    /// Results longer than this are truncated in the log
    #[serde(default = "default_max_result_length")]
    pub max_result_length: usize,

    #[serde(default)]
    pub exclude_tools: Vec<String>,

    #[serde(default = "default_true")]
    pub sanitize_parameters: bool,

    #[serde(default = "default_parameter_blacklist")]
    pub parameter_blacklist: Vec<String>,
}

fn default_log_file_prefix() -> String {
    "tools-".into()
}
fn default_max_result_length() -> usize {
    100
}
fn default_parameter_blacklist() -> Vec<String> {
    vec![
        "api_key".into(),
        "password".into(),
        "token".into(),
        "secret".into(),
    ]
}

impl Default for ToolLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            notify_channel: false,
            typing_only: true,
            log_file_prefix: default_log_file_prefix(),
            max_result_length: default_max_result_length(),
            exclude_tools: Vec::new(),
            sanitize_parameters: true,
            parameter_blacklist: default_parameter_blacklist(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.hookclaw/config.toml).
    ///
    /// Environment overrides:
    /// - `HOOKCLAW_API_KEY`, then `OPENROUTER_API_KEY`, then `OPENAI_API_KEY`
    /// - `HOOKCLAW_API_BASE`
    /// - `HOOKCLAW_MODEL`
    /// - `HOOKCLAW_WORKSPACE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("HOOKCLAW_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(base) = std::env::var("HOOKCLAW_API_BASE") {
            config.api_base = base;
        }

        if let Ok(model) = std::env::var("HOOKCLAW_MODEL") {
            config.default_model = model;
        }

        if let Ok(workspace) = std::env::var("HOOKCLAW_WORKSPACE") {
            config.workspace = workspace;
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".hookclaw")
    }

    /// Where sessions and tool-usage logs are written.
    pub fn sessions_dir() -> PathBuf {
        Self::config_dir().join("sessions")
    }

    /// The workspace path with a leading `~` expanded.
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.workspace)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be > 0".into(),
            ));
        }

        if self.agent.think_harder_iterations < self.agent.max_tool_iterations {
            return Err(ConfigError::ValidationError(
                "agent.think_harder_iterations must be >= agent.max_tool_iterations".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            default_model: default_model(),
            planner_model: default_planner_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            workspace: default_workspace(),
            agent: AgentSettings::default(),
            tools: ToolsConfig::default(),
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

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_home().join(rest),
        None if path == "~" => dirs_home(),
        None => PathBuf::from(path),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_tool_iterations, 20);
        assert_eq!(config.agent.think_harder_iterations, 50);
        assert!(!config.tools.logging.enabled);
        assert!(config.tools.logging.typing_only);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.tools.logging.max_result_length, 100);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn think_harder_cap_must_not_shrink() {
        let mut config = AppConfig::default();
        config.agent.think_harder_iterations = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.planner_model, "deepseek/deepseek-reasoner");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
default_model = "openai/gpt-4o"

[agent]
max_tool_iterations = 8

[tools.logging]
enabled = true
exclude_tools = ["read_file"]
"#
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "openai/gpt-4o");
        assert_eq!(config.agent.max_tool_iterations, 8);
        assert_eq!(config.agent.history_limit, 50);
        assert!(config.tools.logging.enabled);
        assert_eq!(config.tools.logging.exclude_tools, vec!["read_file"]);
        assert_eq!(config.tools.logging.log_file_prefix, "tools-");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("deepseek/deepseek-reasoner"));
        assert!(toml_str.contains("max_tool_iterations"));
    }

    #[test]
    fn expand_home_handles_tilde() {
        let expanded = expand_home("~/work");
        assert!(expanded.ends_with("work"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
