//! Agent settings (TOML) and endpoint credentials (environment).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const API_KEY_ENV: &str = "GPT_OSS_API_KEY";
pub const API_BASE_ENV: &str = "GPT_OSS_API_BASE";
pub const CONFIG_PATH_ENV: &str = "BASH_AGENT_CONFIG";
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CONFIG_PATH: &str = ".bash-agent/config.toml";

/// Invalid or missing configuration. Fatal before any task starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingApiKey,
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingApiKey => write!(
                f,
                "{API_KEY_ENV} not found in environment; set it before running the agent"
            ),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Agent settings.
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier sent with every request.
    pub model: String,

    pub temperature: f64,

    /// Response-length cap per request.
    pub max_tokens: u32,

    /// Overall HTTP request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Wall-clock limit for each shell command in seconds.
    pub command_timeout_secs: u64,

    /// Model calls per task when a task is given on the command line.
    pub max_iterations: u32,

    /// Model calls per task for the built-in demo tasks.
    pub demo_max_iterations: u32,

    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    /// Directory commands run in. Defaults to the process working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// Name of the shell tool advertised to the model.
    pub tool_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-oss-20b".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            request_timeout_secs: 60,
            command_timeout_secs: 30,
            max_iterations: 5,
            demo_max_iterations: 3,
            output_limit_bytes: 1_000_000,
            workdir: None,
            tool_name: "execute_bash".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must be non-empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(
                "temperature must be within 0.0..=2.0".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be > 0".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "command_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.max_iterations == 0 || self.demo_max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations and demo_max_iterations must be > 0".to_string(),
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(ConfigError::Invalid(
                "output_limit_bytes must be > 0".to_string(),
            ));
        }
        if self.tool_name.trim().is_empty() {
            return Err(ConfigError::Invalid("tool_name must be non-empty".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Working directory for commands, falling back to the current directory.
    pub fn resolve_workdir(&self) -> Result<PathBuf> {
        match &self.workdir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("resolve current directory"),
        }
    }
}

/// Where to reach the model and how to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub api_key: String,
    pub api_base: String,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl EndpointConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (the environment in production).
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let api_key = lookup(API_KEY_ENV)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let api_base = lookup(API_BASE_ENV)
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Ok(Self { api_key, api_base })
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_base)
    }
}

/// Settings file path from `BASH_AGENT_CONFIG`, or the default location.
pub fn config_path_from_env() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
