//! Configuration loading and validation for jretrofit.
//!
//! This module provides:
//! - Typed configuration structures (agents, exclusions, restart policy, daemon)
//! - Deterministic config resolution (CLI > env > cwd > XDG > /etc > defaults)
//! - Semantic validation with stable issue codes
//! - Config snapshots for audit logging

pub mod resolve;
pub mod snapshot;
pub mod validate;

pub use resolve::{ConfigResolution, ConfigResolver, ConfigSource, SearchLocations};
pub use snapshot::ConfigSnapshot;
pub use validate::{Severity, ValidationError, ValidationIssue};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// The complete jretrofit configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogSettings,
    pub agents: Vec<AgentConfig>,
    pub process: ProcessSettings,
    pub daemon: DaemonSettings,
    pub exclude: Vec<ExcludeRuleConfig>,
    pub restart: RestartConfig,
    pub security: SecuritySettings,
}

/// Logging defaults; CLI flags and `JR_LOG*` variables take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "human".to_string(),
        }
    }
}

/// An instrumentation agent to attach at JVM startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower values are inserted first.
    #[serde(default)]
    pub priority: i32,
}

/// Default process selection used by `list`, `inject --all` and the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub scan_interval_secs: u64,
    /// Regexes matched against process name, jar and main class.
    pub include_patterns: Vec<String>,
    /// Only processes owned by these users.
    pub user_filter: Vec<String>,
    pub auto_restart: bool,
    /// Minimum process age before it is considered.
    pub min_uptime_secs: Option<u64>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            include_patterns: Vec::new(),
            user_filter: Vec::new(),
            auto_restart: true,
            min_uptime_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub pid_file: Option<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
            pid_file: None,
        }
    }
}

/// A named veto: any matching pid, user or pattern excludes the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeRuleConfig {
    pub name: String,
    pub pids: Vec<u32>,
    pub users: Vec<String>,
    pub patterns: Vec<String>,
}

/// What to do when the old process cannot be signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopFailurePolicy {
    /// Log and start the replacement anyway.
    #[default]
    Proceed,
    /// Fail the target.
    Abort,
}

impl std::fmt::Display for StopFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopFailurePolicy::Proceed => write!(f, "proceed"),
            StopFailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Stop/start/verify timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub grace_period_ms: u64,
    pub kill_timeout_ms: u64,
    /// Total start attempts, including the first.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub verify_wait_ms: u64,
    pub force_kill: bool,
    pub on_stop_failure: StopFailurePolicy,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 10_000,
            kill_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            verify_wait_ms: 5_000,
            force_kill: true,
            on_stop_failure: StopFailurePolicy::Proceed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub check_permissions: bool,
    pub require_confirmation: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            check_permissions: true,
            require_confirmation: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// On-disk encodings accepted for the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the file extension; anything unknown is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl Config {
    /// Parse configuration text in the given format.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            // An empty YAML document deserializes to unit, not to a map.
            ConfigFormat::Yaml if content.trim().is_empty() => Config::default(),
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
        };
        Ok(config)
    }

    /// Read and parse a config file, choosing the format by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, ConfigFormat::from_path(path))
    }

    /// Enabled agents ordered by priority, then by declaration order.
    pub fn enabled_agents(&self) -> Vec<&AgentConfig> {
        let mut agents: Vec<&AgentConfig> = self.agents.iter().filter(|a| a.enabled).collect();
        agents.sort_by_key(|a| a.priority);
        agents
    }

    /// Semantic validation; returns every issue found.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        validate::validate_config(self)
    }

    /// Fail if validation reports any error-severity issue.
    pub fn check(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| i.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(errors.join("; ")))
        }
    }
}
