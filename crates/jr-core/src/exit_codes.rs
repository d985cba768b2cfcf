//! Exit codes for the jretrofit CLI.
//!
//! Exit code ranges:
//! - 0-3: Operational outcomes (parse the outcome from the code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors

use crate::inject::BatchSummary;

/// Stable exit codes for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-3)
    // ========================================================================
    /// Clean run; every attempted injection succeeded
    Clean = 0,

    /// Nothing to do: no matching targets, or all already instrumented
    NothingToDo = 1,

    /// Some targets failed
    PartialFail = 2,

    /// Every attempted target failed
    AllFailed = 3,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Config file missing, unparseable or invalid
    ConfigError = 11,

    /// Process table unreadable
    DiscoveryError = 12,

    /// Caller may not restart the targets
    PermissionError = 13,

    /// Interrupted by a signal or declined at the confirmation prompt
    Cancelled = 14,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes 0-1.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::NothingToDo)
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 2
    }

    /// Name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::NothingToDo => "OK_NOTHING_TO_DO",
            ExitCode::PartialFail => "ERR_PARTIAL",
            ExitCode::AllFailed => "ERR_ALL_FAILED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::DiscoveryError => "ERR_DISCOVERY",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::Cancelled => "ERR_CANCELLED",
            ExitCode::InternalError => "ERR_INTERNAL",
        }
    }

    /// Outcome of an injection batch.
    ///
    /// Permission failures dominate when they are the only kind seen, since
    /// rerunning as the owner is the fix.
    pub fn from_summary(summary: &BatchSummary, all_permission: bool) -> Self {
        if summary.attempted == 0 || summary.attempted == summary.skipped {
            ExitCode::NothingToDo
        } else if summary.failed == 0 {
            ExitCode::Clean
        } else if all_permission {
            ExitCode::PermissionError
        } else if summary.succeeded == 0 {
            ExitCode::AllFailed
        } else {
            ExitCode::PartialFail
        }
    }

    /// Exit code for a workspace-level error.
    pub fn from_error(err: &jr_common::Error) -> Self {
        use jr_common::ErrorCategory;
        match err.category() {
            ErrorCategory::Config => ExitCode::ConfigError,
            ErrorCategory::Discovery => match err {
                jr_common::Error::PermissionDenied { .. } => ExitCode::PermissionError,
                _ => ExitCode::DiscoveryError,
            },
            ErrorCategory::Restart | ErrorCategory::Io => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(attempted: usize, succeeded: usize, failed: usize, skipped: usize) -> BatchSummary {
        BatchSummary {
            attempted,
            succeeded,
            failed,
            skipped,
        }
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Clean.as_i32(), 0);
        assert_eq!(ExitCode::NothingToDo.as_i32(), 1);
        assert_eq!(ExitCode::PartialFail.as_i32(), 2);
        assert_eq!(ExitCode::AllFailed.as_i32(), 3);
        assert_eq!(ExitCode::ArgsError.as_i32(), 10);
        assert_eq!(ExitCode::Cancelled.as_i32(), 14);
        assert_eq!(i32::from(ExitCode::InternalError), 20);
    }

    #[test]
    fn test_from_summary() {
        assert_eq!(ExitCode::from_summary(&summary(0, 0, 0, 0), false), ExitCode::NothingToDo);
        assert_eq!(ExitCode::from_summary(&summary(2, 0, 0, 2), false), ExitCode::NothingToDo);
        assert_eq!(ExitCode::from_summary(&summary(3, 2, 0, 1), false), ExitCode::Clean);
        assert_eq!(ExitCode::from_summary(&summary(3, 2, 1, 0), false), ExitCode::PartialFail);
        assert_eq!(ExitCode::from_summary(&summary(2, 0, 2, 0), false), ExitCode::AllFailed);
        assert_eq!(ExitCode::from_summary(&summary(2, 0, 2, 0), true), ExitCode::PermissionError);
    }

    #[test]
    fn test_from_error() {
        let config = jr_common::Error::InvalidConfig("bad".into());
        assert_eq!(ExitCode::from_error(&config), ExitCode::ConfigError);
        let denied = jr_common::Error::PermissionDenied { pid: 1 };
        assert_eq!(ExitCode::from_error(&denied), ExitCode::PermissionError);
        let table = jr_common::Error::Discovery("gone".into());
        assert_eq!(ExitCode::from_error(&table), ExitCode::DiscoveryError);
    }

    #[test]
    fn test_classification() {
        assert!(ExitCode::NothingToDo.is_success());
        assert!(!ExitCode::PartialFail.is_success());
        assert!(ExitCode::ConfigError.is_user_error());
        assert!(!ExitCode::InternalError.is_user_error());
        assert_eq!(ExitCode::Cancelled.to_string(), "ERR_CANCELLED (14)");
    }
}
