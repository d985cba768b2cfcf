//! Configuration validation errors and semantic validation.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use super::Config;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("agent file not found for {field}: {path}")]
    AgentFileMissing { field: String, path: String },

    #[error("invalid pattern in {field}: {message}")]
    InvalidPattern { field: String, message: String },

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::MissingField(_) => 64,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::AgentFileMissing { .. } => 66,
            ValidationError::InvalidPattern { .. } => 67,
            ValidationError::DuplicateAgent(_) => 68,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One finding from [`validate_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub error: ValidationError,
}

impl ValidationIssue {
    fn error(error: ValidationError) -> Self {
        Self {
            severity: Severity::Error,
            error,
        }
    }

    fn warning(error: ValidationError) -> Self {
        Self {
            severity: Severity::Warning,
            error,
        }
    }

    pub fn code(&self) -> u32 {
        self.error.code()
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{} [{}]: {}", tag, self.code(), self.error)
    }
}

/// Validate a loaded configuration semantically.
///
/// Invalid regexes are warnings: the policy engine skips them at match time.
pub fn validate_config(config: &Config) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_names: Vec<&str> = Vec::new();

    for (i, agent) in config.agents.iter().enumerate() {
        if agent.name.trim().is_empty() {
            issues.push(ValidationIssue::error(ValidationError::MissingField(
                format!("agents[{}].name", i),
            )));
        } else if seen_names.contains(&agent.name.as_str()) {
            issues.push(ValidationIssue::warning(ValidationError::DuplicateAgent(
                agent.name.clone(),
            )));
        } else {
            seen_names.push(agent.name.as_str());
        }

        if agent.path.trim().is_empty() {
            issues.push(ValidationIssue::error(ValidationError::MissingField(
                format!("agents[{}].path", i),
            )));
        } else if agent.enabled && !Path::new(&agent.path).exists() {
            issues.push(ValidationIssue::error(ValidationError::AgentFileMissing {
                field: format!("agents[{}].path", i),
                path: agent.path.clone(),
            }));
        }
    }

    if config.process.scan_interval_secs == 0 {
        issues.push(ValidationIssue::error(ValidationError::InvalidValue {
            field: "process.scan_interval_secs".to_string(),
            message: "must be greater than 0".to_string(),
        }));
    }

    if config.daemon.interval_secs == 0 {
        issues.push(ValidationIssue::error(ValidationError::InvalidValue {
            field: "daemon.interval_secs".to_string(),
            message: "must be greater than 0".to_string(),
        }));
    }

    if config.restart.max_retries == 0 {
        issues.push(ValidationIssue::error(ValidationError::InvalidValue {
            field: "restart.max_retries".to_string(),
            message: "at least one start attempt is required".to_string(),
        }));
    }

    for (i, pattern) in config.process.include_patterns.iter().enumerate() {
        check_pattern(&mut issues, format!("process.include_patterns[{}]", i), pattern);
    }

    for (i, rule) in config.exclude.iter().enumerate() {
        for (j, pattern) in rule.patterns.iter().enumerate() {
            check_pattern(&mut issues, format!("exclude[{}].patterns[{}]", i, j), pattern);
        }
    }

    issues
}

fn check_pattern(issues: &mut Vec<ValidationIssue>, field: String, pattern: &str) {
    if let Err(e) = Regex::new(pattern) {
        issues.push(ValidationIssue::warning(ValidationError::InvalidPattern {
            field,
            message: e.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, ExcludeRuleConfig};

    fn agent(name: &str, path: &str, enabled: bool) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            path: path.to_string(),
            options: None,
            enabled,
            priority: 0,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_empty());
    }

    #[test]
    fn test_missing_agent_fields() {
        let mut config = Config::default();
        config.agents.push(agent("", "", false));
        let issues = validate_config(&config);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.code() == 64));
    }

    #[test]
    fn test_enabled_agent_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("agent.jar");
        std::fs::write(&present, b"jar").unwrap();

        let mut config = Config::default();
        config
            .agents
            .push(agent("ok", present.to_str().unwrap(), true));
        config.agents.push(agent("gone", "/nonexistent/agent.jar", true));
        config
            .agents
            .push(agent("off", "/nonexistent/other.jar", false));

        let issues = validate_config(&config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
        assert!(matches!(
            issues[0].error,
            ValidationError::AgentFileMissing { .. }
        ));
    }

    #[test]
    fn test_invalid_pattern_is_warning() {
        let mut config = Config::default();
        config.exclude.push(ExcludeRuleConfig {
            name: "bad".into(),
            patterns: vec!["([unclosed".into()],
            ..Default::default()
        });
        let issues = validate_config(&config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_zero_intervals_and_retries() {
        let mut config = Config::default();
        config.process.scan_interval_secs = 0;
        config.daemon.interval_secs = 0;
        config.restart.max_retries = 0;
        let issues = validate_config(&config);
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().all(|i| i.severity == Severity::Error));
    }

    #[test]
    fn test_duplicate_agent_name_warns() {
        let mut config = Config::default();
        config.agents.push(agent("a", "/x.jar", false));
        config.agents.push(agent("a", "/y.jar", false));
        let issues = validate_config(&config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].error, ValidationError::DuplicateAgent("a".into()));
    }

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue::error(ValidationError::MissingField("agents[0].name".into()));
        assert_eq!(
            issue.to_string(),
            "error [64]: missing required field: agents[0].name"
        );
    }
}
