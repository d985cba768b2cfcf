//! Structured event vocabulary for logging.
//!
//! Every event carries the run correlation IDs from [`LogContext`], a stable
//! event name and the pipeline stage it belongs to.

use serde::{Deserialize, Serialize};

/// Processing stages in the jr-core pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Process table enumeration and per-process reads.
    Discover,
    Classify,
    Filter,
    Rewrite,
    /// Signalling the old process.
    Stop,
    /// Spawning the replacement.
    Start,
    /// Post-start liveness and agent checks.
    Verify,
    /// Batch sequencing.
    Inject,
    Daemon,
    Shutdown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Discover => "discover",
            Stage::Classify => "classify",
            Stage::Filter => "filter",
            Stage::Rewrite => "rewrite",
            Stage::Stop => "stop",
            Stage::Start => "start",
            Stage::Verify => "verify",
            Stage::Inject => "inject",
            Stage::Daemon => "daemon",
            Stage::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_WARNING: &str = "config.warning";

    // Discover stage
    pub const SCAN_STARTED: &str = "scan.started";
    pub const SCAN_FINISHED: &str = "scan.finished";
    pub const SCAN_CANCELLED: &str = "scan.cancelled";
    pub const PROCESS_UNREADABLE: &str = "process.unreadable";
    pub const PROCESS_FIELD_DEGRADED: &str = "process.field_degraded";

    // Filter stage
    pub const FILTER_PATTERN_INVALID: &str = "filter.pattern_invalid";
    pub const FILTER_EXCLUDED: &str = "filter.excluded";

    // Stop stage
    pub const STOP_SIGNALLED: &str = "restart.stop_signalled";
    pub const STOP_EXITED: &str = "restart.stop_exited";
    pub const STOP_TIMEOUT: &str = "restart.stop_timeout";
    pub const STOP_FORCED: &str = "restart.stop_forced";
    pub const STOP_FAILED: &str = "restart.stop_failed";

    // Start stage
    pub const START_ATTEMPT: &str = "restart.start_attempt";
    pub const START_RETRY: &str = "restart.start_retry";
    pub const START_FAILED: &str = "restart.start_failed";

    // Verify stage
    pub const VERIFY_FAILED: &str = "restart.verify_failed";
    pub const RESTART_SUCCEEDED: &str = "restart.succeeded";
    pub const AGENTS_MISSING: &str = "verify.agents_missing";

    // Inject stage
    pub const INJECT_STARTED: &str = "inject.started";
    pub const INJECT_RESULT: &str = "inject.result";
    pub const INJECT_CANCELLED: &str = "inject.cancelled";
    pub const INJECT_FINISHED: &str = "inject.finished";

    // Daemon
    pub const DAEMON_STARTED: &str = "daemon.started";
    pub const DAEMON_PASS: &str = "daemon.pass";
    pub const DAEMON_STOPPED: &str = "daemon.stopped";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Logger handle passed to every component at construction.
///
/// Components emit through [`crate::log_event!`] with this context instead
/// of reaching for process-wide state, so a test can install a capturing
/// subscriber with `tracing::subscriber::with_default` and observe exactly
/// one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    /// Unique ID for this invocation.
    pub run_id: String,
    /// Host identifier.
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }

    /// Context for a fresh invocation on this host.
    pub fn for_run() -> Self {
        LogContext::new(super::generate_run_id(), super::get_host_id())
    }
}
