//! Error types for jretrofit.
//!
//! Errors carry stable numeric codes grouped by category so that JSON
//! consumers can branch on them without parsing messages:
//!
//! ```json
//! {
//!   "code": 41,
//!   "category": "restart",
//!   "message": "process 4242 did not exit within 10000ms",
//!   "recoverable": true,
//!   "context": { "pid": 4242 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for jretrofit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Process table enumeration and per-process reads.
    Discovery,
    /// Stop/start/verify of a target process.
    Restart,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Discovery => write!(f, "discovery"),
            ErrorCategory::Restart => write!(f, "restart"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for jretrofit.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: String },

    // Discovery errors (20-29)
    #[error("process table unreadable: {0}")]
    Discovery(String),

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("permission denied accessing process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("process {pid} unreadable: {reason}")]
    ProcessUnreadable { pid: u32, reason: String },

    // Restart errors (40-49)
    #[error("restart failed: {0}")]
    Restart(String),

    #[error("process {pid} did not exit within {millis}ms")]
    StopTimeout { pid: u32, millis: u64 },

    #[error("failed to start process after {attempts} attempts: {reason}")]
    StartFailed { attempts: u32, reason: String },

    #[error("new process {pid} exited during verification")]
    VerifyFailed { pid: u32 },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Discovery errors
    /// - 40-49: Restart errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig(_) => 11,
            Error::ConfigNotFound { .. } => 12,
            Error::Discovery(_) => 20,
            Error::ProcessNotFound { .. } => 21,
            Error::PermissionDenied { .. } => 22,
            Error::ProcessUnreadable { .. } => 23,
            Error::Restart(_) => 40,
            Error::StopTimeout { .. } => 41,
            Error::StartFailed { .. } => 42,
            Error::VerifyFailed { .. } => 43,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Yaml(_) => 62,
            Error::Toml(_) => 63,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) | Error::ConfigNotFound { .. } => {
                ErrorCategory::Config
            }

            Error::Discovery(_)
            | Error::ProcessNotFound { .. }
            | Error::PermissionDenied { .. }
            | Error::ProcessUnreadable { .. } => ErrorCategory::Discovery,

            Error::Restart(_)
            | Error::StopTimeout { .. }
            | Error::StartFailed { .. }
            | Error::VerifyFailed { .. } => ErrorCategory::Restart,

            Error::Io(_) | Error::Json(_) | Error::Yaml(_) | Error::Toml(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable by retrying,
    /// fixing configuration or elevating privileges.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) | Error::ConfigNotFound { .. } => true,

            // The process table itself is gone; nothing to retry against.
            Error::Discovery(_) => false,
            Error::ProcessNotFound { .. } => false,
            Error::PermissionDenied { .. } => true,
            Error::ProcessUnreadable { .. } => true,

            Error::Restart(_) => true,
            Error::StopTimeout { .. } => true,
            Error::StartFailed { .. } => true,
            // The replacement crashed; retrying will most likely crash again.
            Error::VerifyFailed { .. } => false,

            Error::Io(_) => true,
            Error::Json(_) | Error::Yaml(_) | Error::Toml(_) => true,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidConfig(_) => "Invalid Configuration",
            Error::ConfigNotFound { .. } => "Configuration Not Found",
            Error::Discovery(_) => "Process Discovery Failed",
            Error::ProcessNotFound { .. } => "Process Not Found",
            Error::PermissionDenied { .. } => "Permission Denied",
            Error::ProcessUnreadable { .. } => "Process Unreadable",
            Error::Restart(_) => "Restart Failed",
            Error::StopTimeout { .. } => "Stop Timeout",
            Error::StartFailed { .. } => "Start Failed",
            Error::VerifyFailed { .. } => "Verification Failed",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::Yaml(_) => "YAML Error",
            Error::Toml(_) => "TOML Error",
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) => {
                "Run 'jretrofit config validate' and fix the reported entries."
            }
            Error::ConfigNotFound { .. } => {
                "Pass an existing file with --config, or drop the flag to use defaults."
            }
            Error::Discovery(_) => "Check that /proc is mounted and readable.",
            Error::ProcessNotFound { .. } => {
                "The process exited before it could be handled. Rescan and retry."
            }
            Error::PermissionDenied { .. } => {
                "Run as the process owner or as root to restart it."
            }
            Error::ProcessUnreadable { .. } => "The process raced with the scan. Rescan and retry.",
            Error::Restart(_) | Error::StartFailed { .. } => {
                "Check the launch command, working directory and agent path, then retry."
            }
            Error::StopTimeout { .. } => {
                "Increase restart.grace_period_ms or allow a forceful kill (restart.force_kill)."
            }
            Error::VerifyFailed { .. } => {
                "The replacement crashed on startup. Check the agent jar and its options."
            }
            Error::Io(_) => "Check file permissions and disk space, then retry.",
            Error::Json(_) | Error::Yaml(_) | Error::Toml(_) => {
                "Fix the syntax of the configuration file."
            }
        }
    }
}

/// Machine-readable error for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::ProcessNotFound { pid }
            | Error::PermissionDenied { pid }
            | Error::VerifyFailed { pid } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
            }
            Error::ProcessUnreadable { pid, .. } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
            }
            Error::StopTimeout { pid, millis } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
                context.insert("timeout_ms".to_string(), serde_json::json!(millis));
            }
            Error::StartFailed { attempts, .. } => {
                context.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            Error::ConfigNotFound { path } => {
                context.insert("path".to_string(), serde_json::json!(path));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for a terminal: headline, reason and fix.
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_grouped_by_category() {
        let cases = vec![
            Error::Config("x".into()),
            Error::Discovery("x".into()),
            Error::StopTimeout { pid: 1, millis: 10 },
            Error::Io(std::io::Error::other("x")),
        ];
        for err in cases {
            let code = err.code();
            let expected = match err.category() {
                ErrorCategory::Config => 10..20,
                ErrorCategory::Discovery => 20..30,
                ErrorCategory::Restart => 40..50,
                ErrorCategory::Io => 60..70,
            };
            assert!(expected.contains(&code), "{} has code {}", err, code);
        }
    }

    #[test]
    fn test_verify_failed_message() {
        let err = Error::VerifyFailed { pid: 77 };
        assert_eq!(err.to_string(), "new process 77 exited during verification");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::StopTimeout {
            pid: 42,
            millis: 5000,
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 41);
        assert_eq!(structured.category, ErrorCategory::Restart);
        assert_eq!(structured.context["pid"], serde_json::json!(42));
        assert_eq!(structured.context["timeout_ms"], serde_json::json!(5000));

        let json = structured.to_json();
        assert!(json.contains("\"category\":\"restart\""));
    }

    #[test]
    fn test_format_error_human_without_color() {
        let err = Error::PermissionDenied { pid: 9 };
        let text = format_error_human(&err, false);
        assert!(text.starts_with("✗ Permission Denied"));
        assert!(text.contains("Reason: permission denied accessing process 9"));
        assert!(!text.contains("\x1b["));
    }
}
