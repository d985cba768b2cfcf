//! Discovery and injection result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::RestartError;
use crate::classify::{AgentDescriptor, ClassifiedProcess};

/// Output of one discovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub processes: Vec<ClassifiedProcess>,
    /// Pids listed in the process table.
    pub scanned: usize,
    /// Pids whose read failed, typically because they exited mid-scan.
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Machine-readable reason an injection did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Permission,
    CaptureFailed,
    StopTimeout,
    StopFailed,
    StartFailed,
    VerifyFailed,
    /// Every requested agent was already attached; nothing was restarted.
    AlreadyInstrumented,
}

impl From<&RestartError> for FailureKind {
    fn from(err: &RestartError) -> Self {
        match err {
            RestartError::Capture { .. } => FailureKind::CaptureFailed,
            RestartError::PermissionDenied { .. } => FailureKind::Permission,
            RestartError::StopTimeout { .. } => FailureKind::StopTimeout,
            RestartError::StopFailed { .. } => FailureKind::StopFailed,
            RestartError::StartFailed { .. } => FailureKind::StartFailed,
            RestartError::VerifyFailed { .. } => FailureKind::VerifyFailed,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Permission => "permission",
            FailureKind::CaptureFailed => "capture_failed",
            FailureKind::StopTimeout => "stop_timeout",
            FailureKind::StopFailed => "stop_failed",
            FailureKind::StartFailed => "start_failed",
            FailureKind::VerifyFailed => "verify_failed",
            FailureKind::AlreadyInstrumented => "already_instrumented",
        };
        write!(f, "{}", s)
    }
}

/// Dry-run view of what an injection would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionPlan {
    pub pid: u32,
    pub agents: Vec<AgentDescriptor>,
    pub old_command_line: Vec<String>,
    pub new_command_line: Vec<String>,
}

/// Outcome for one target. Fully populated before it is returned.
///
/// `success` implies a non-zero `new_pid` that passed the liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionResult {
    pub pid: u32,
    pub success: bool,
    /// Zero when no replacement was created.
    pub new_pid: u32,
    pub old_command_line: Vec<String>,
    pub new_command_line: Vec<String>,
    pub old_agents: Vec<AgentDescriptor>,
    /// Agents read back from the replacement; empty if it could not be read.
    pub new_agents: Vec<AgentDescriptor>,
    /// Start attempts used; zero if the restart never reached the start phase.
    pub attempts: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InjectionResult {
    pub(crate) fn pending(process: &ClassifiedProcess) -> Self {
        Self {
            pid: process.pid(),
            success: false,
            new_pid: 0,
            old_command_line: process.snapshot.cmdline.clone(),
            new_command_line: Vec::new(),
            old_agents: process.agents.clone(),
            new_agents: Vec::new(),
            attempts: 0,
            message: String::new(),
            failure: None,
            error: None,
        }
    }

    pub(crate) fn fail(mut self, kind: FailureKind, message: String, error: Option<String>) -> Self {
        self.success = false;
        self.new_pid = 0;
        self.failure = Some(kind);
        self.message = message;
        self.error = error;
        self
    }
}

/// Aggregate counts over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Targets that needed nothing.
    pub skipped: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[InjectionResult]) -> Self {
        let mut summary = BatchSummary {
            attempted: results.len(),
            ..Default::default()
        };
        for r in results {
            if r.success {
                summary.succeeded += 1;
            } else if r.failure == Some(FailureKind::AlreadyInstrumented) {
                summary.skipped += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
