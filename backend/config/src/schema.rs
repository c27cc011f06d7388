//! Famulus runtime configuration schema.
//!
//! Every field has a working default, so a missing or partial config file is
//! never an error. Values are plain (not `Option`): absence in YAML means
//! "use the default".

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FamulusConfig {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub usage: UsageConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local model service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    #[serde(default = "default_model_name")]
    pub model: String,

    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

/// Plugin discovery and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PluginsConfig {
    /// Plugins root; each subdirectory with a manifest is a candidate.
    /// Relative paths resolve against the config directory.
    #[serde(default = "default_plugins_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

/// Tool-use loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct AgentConfig {
    /// Cap on model calls per user turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

/// Usage tracker retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct UsageConfig {
    #[serde(default = "default_max_recent_sessions")]
    pub max_recent_sessions: usize,

    /// Sessions idle longer than this are archived; archives older than this
    /// are purged.
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
}

/// Gateway HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default tracing filter, overridable via `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory. Relative paths resolve against the config directory.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_model_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model_name() -> String {
    "llama3".to_string()
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}
fn default_probe_timeout_ms() -> u64 {
    2000
}
fn default_invoke_timeout_secs() -> u64 {
    30
}
fn default_stop_grace_secs() -> u64 {
    5
}
fn default_max_iterations() -> usize {
    5
}
fn default_max_recent_sessions() -> usize {
    20
}
fn default_session_max_age_secs() -> u64 {
    3600
}
fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}
fn default_gateway_port() -> u16 {
    5100
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            model: default_model_name(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
            probe_timeout_ms: default_probe_timeout_ms(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            max_recent_sessions: default_max_recent_sessions(),
            session_max_age_secs: default_session_max_age_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}
