//! Restart orchestrator: stop, start with retry, verify.
//!
//! States per invocation:
//!
//! ```text
//! Idle -> Stopping -> Starting (retry loop) -> Verifying -> Succeeded
//!            |             |                       |
//!            +-------------+-----------------------+----> Failed
//! ```
//!
//! The working directory and environment are captured before any signal is
//! sent, because they are read from the live process.

use std::ffi::OsString;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use jr_common::config::{RestartConfig, StopFailurePolicy};

use super::control::{ControlError, LaunchSpec, ProcessControl};
use super::signal::Signal;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};

/// Timing and escalation rules for one restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Wait for exit after the graceful signal.
    pub grace_period: Duration,
    /// Wait for exit after the forceful kill.
    pub kill_timeout: Duration,
    pub verify_wait: Duration,
    pub retry_delay: Duration,
    /// Total start attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    /// Escalate to a forceful kill when the grace period runs out.
    pub force_kill: bool,
    pub on_stop_failure: StopFailurePolicy,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from(&RestartConfig::default())
    }
}

impl From<&RestartConfig> for RestartPolicy {
    fn from(cfg: &RestartConfig) -> Self {
        Self {
            grace_period: Duration::from_millis(cfg.grace_period_ms),
            kill_timeout: Duration::from_millis(cfg.kill_timeout_ms),
            verify_wait: Duration::from_millis(cfg.verify_wait_ms),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            max_retries: cfg.max_retries,
            force_kill: cfg.force_kill,
            on_stop_failure: cfg.on_stop_failure,
        }
    }
}

/// Old pid, new argument vector and the policy to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    pub old_pid: u32,
    /// Raw argument vector for the replacement.
    pub command_line: Vec<OsString>,
    pub policy: RestartPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartState {
    Idle,
    Stopping,
    Starting,
    Verifying,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RestartState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RestartState::Idle => "idle",
            RestartState::Stopping => "stopping",
            RestartState::Starting => "starting",
            RestartState::Verifying => "verifying",
            RestartState::Succeeded => "succeeded",
            RestartState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// How the old process went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum StopOutcome {
    /// Exited within the grace period.
    Exited,
    /// Killed after the grace period.
    Forced,
    /// Still present after the forceful kill and its timeout.
    Lingering,
    /// Signalling failed and the policy said to carry on.
    Tolerated(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartOutcome {
    pub old_pid: u32,
    pub new_pid: u32,
    /// Start attempts used, including the successful one.
    pub attempts: u32,
    pub stop: StopOutcome,
}

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("cannot capture launch context of process {pid}: {reason}")]
    Capture { pid: u32, reason: String },

    #[error("permission denied for process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("process {pid} did not exit within {}ms and forceful stop is disabled", .waited.as_millis())]
    StopTimeout { pid: u32, waited: Duration },

    #[error("failed to stop process {pid}: {reason}")]
    StopFailed { pid: u32, reason: String },

    #[error("failed to start process after {attempts} attempt(s): {last}")]
    StartFailed { attempts: u32, last: String },

    #[error("new process {new_pid} exited during verification")]
    VerifyFailed { new_pid: u32 },
}

impl From<RestartError> for jr_common::Error {
    fn from(err: RestartError) -> Self {
        match err {
            RestartError::Capture { pid, reason } => {
                jr_common::Error::ProcessUnreadable { pid, reason }
            }
            RestartError::PermissionDenied { pid } => jr_common::Error::PermissionDenied { pid },
            RestartError::StopTimeout { pid, waited } => jr_common::Error::StopTimeout {
                pid,
                millis: waited.as_millis() as u64,
            },
            RestartError::StartFailed { attempts, last } => jr_common::Error::StartFailed {
                attempts,
                reason: last,
            },
            RestartError::VerifyFailed { new_pid } => {
                jr_common::Error::VerifyFailed { pid: new_pid }
            }
            other @ RestartError::StopFailed { .. } => jr_common::Error::Restart(other.to_string()),
        }
    }
}

/// Drives one restart at a time through a [`ProcessControl`].
pub struct RestartOrchestrator<'a> {
    control: &'a dyn ProcessControl,
    log: &'a LogContext,
}

impl<'a> RestartOrchestrator<'a> {
    pub fn new(control: &'a dyn ProcessControl, log: &'a LogContext) -> Self {
        Self { control, log }
    }

    /// Run a plan to a terminal state. Never interrupted once started.
    pub fn run(&self, plan: &RestartPlan) -> Result<RestartOutcome, RestartError> {
        let pid = plan.old_pid;
        self.transition(pid, RestartState::Idle, RestartState::Stopping);

        let context = self.control.capture(pid).map_err(|e| match e {
            ControlError::PermissionDenied(pid) => RestartError::PermissionDenied { pid },
            other => RestartError::Capture {
                pid,
                reason: other.to_string(),
            },
        });
        let context = self.fail_on_err(pid, RestartState::Stopping, context)?;

        let stop = self.stop(pid, &plan.policy);
        let stop = self.fail_on_err(pid, RestartState::Stopping, stop)?;

        self.transition(pid, RestartState::Stopping, RestartState::Starting);
        let spec = LaunchSpec {
            argv: plan.command_line.clone(),
            context,
        };
        let started = self.start(pid, &spec, &plan.policy);
        let (new_pid, attempts) = self.fail_on_err(pid, RestartState::Starting, started)?;

        self.transition(pid, RestartState::Starting, RestartState::Verifying);
        let verified = self.verify(new_pid, &plan.policy);
        self.fail_on_err(pid, RestartState::Verifying, verified)?;

        self.transition(pid, RestartState::Verifying, RestartState::Succeeded);
        log_event!(
            self.log,
            INFO,
            event_names::RESTART_SUCCEEDED,
            Stage::Verify,
            format!("process {} restarted as {}", pid, new_pid),
            old_pid = pid,
            new_pid = new_pid,
            attempts = attempts
        );

        Ok(RestartOutcome {
            old_pid: pid,
            new_pid,
            attempts,
            stop,
        })
    }

    fn stop(&self, pid: u32, policy: &RestartPolicy) -> Result<StopOutcome, RestartError> {
        match self.control.signal(pid, Signal::Terminate) {
            Ok(()) => {}
            Err(ControlError::PermissionDenied(pid)) => {
                return Err(RestartError::PermissionDenied { pid })
            }
            Err(e) => return self.stop_failure(pid, policy, e.to_string()),
        }
        log_event!(
            self.log,
            INFO,
            event_names::STOP_SIGNALLED,
            Stage::Stop,
            format!("sent SIGTERM to process {}", pid),
            pid = pid,
            grace_ms = policy.grace_period.as_millis() as u64
        );

        if self.control.wait_for_exit(pid, policy.grace_period) {
            log_event!(
                self.log,
                INFO,
                event_names::STOP_EXITED,
                Stage::Stop,
                format!("process {} exited", pid),
                pid = pid
            );
            return Ok(StopOutcome::Exited);
        }

        log_event!(
            self.log,
            WARN,
            event_names::STOP_TIMEOUT,
            Stage::Stop,
            format!(
                "process {} still running after {}ms",
                pid,
                policy.grace_period.as_millis()
            ),
            pid = pid,
            force_kill = policy.force_kill
        );

        if !policy.force_kill {
            return Err(RestartError::StopTimeout {
                pid,
                waited: policy.grace_period,
            });
        }

        match self.control.signal(pid, Signal::Kill) {
            Ok(()) => {}
            // Exited between the timeout and the kill.
            Err(ControlError::NotFound(_)) => return Ok(StopOutcome::Exited),
            Err(ControlError::PermissionDenied(pid)) => {
                return Err(RestartError::PermissionDenied { pid })
            }
            Err(e) => return self.stop_failure(pid, policy, e.to_string()),
        }
        log_event!(
            self.log,
            WARN,
            event_names::STOP_FORCED,
            Stage::Stop,
            format!("sent SIGKILL to process {}", pid),
            pid = pid
        );

        if self.control.wait_for_exit(pid, policy.kill_timeout) {
            Ok(StopOutcome::Forced)
        } else {
            log_event!(
                self.log,
                WARN,
                event_names::STOP_FAILED,
                Stage::Stop,
                format!(
                    "process {} still present {}ms after SIGKILL; starting replacement anyway",
                    pid,
                    policy.kill_timeout.as_millis()
                ),
                pid = pid
            );
            Ok(StopOutcome::Lingering)
        }
    }

    fn stop_failure(
        &self,
        pid: u32,
        policy: &RestartPolicy,
        reason: String,
    ) -> Result<StopOutcome, RestartError> {
        let on_failure = policy.on_stop_failure.to_string();
        log_event!(
            self.log,
            WARN,
            event_names::STOP_FAILED,
            Stage::Stop,
            format!("failed to stop process {}: {}", pid, reason),
            pid = pid,
            on_stop_failure = on_failure.as_str()
        );
        match policy.on_stop_failure {
            StopFailurePolicy::Proceed => Ok(StopOutcome::Tolerated(reason)),
            StopFailurePolicy::Abort => Err(RestartError::StopFailed { pid, reason }),
        }
    }

    fn start(
        &self,
        old_pid: u32,
        spec: &LaunchSpec,
        policy: &RestartPolicy,
    ) -> Result<(u32, u32), RestartError> {
        let max = policy.max_retries.max(1);
        let mut last = String::new();

        for attempt in 1..=max {
            log_event!(
                self.log,
                DEBUG,
                event_names::START_ATTEMPT,
                Stage::Start,
                format!("starting replacement for {} (attempt {}/{})", old_pid, attempt, max),
                old_pid = old_pid,
                attempt = attempt
            );
            match self.control.spawn(spec) {
                Ok(new_pid) => return Ok((new_pid, attempt)),
                Err(e) => {
                    last = e.to_string();
                    if attempt < max {
                        log_event!(
                            self.log,
                            WARN,
                            event_names::START_RETRY,
                            Stage::Start,
                            format!("start attempt {}/{} failed: {}", attempt, max, last),
                            old_pid = old_pid,
                            attempt = attempt
                        );
                        self.control.sleep(policy.retry_delay);
                    }
                }
            }
        }

        log_event!(
            self.log,
            ERROR,
            event_names::START_FAILED,
            Stage::Start,
            format!("giving up after {} attempt(s): {}", max, last),
            old_pid = old_pid,
            attempts = max
        );
        Err(RestartError::StartFailed {
            attempts: max,
            last,
        })
    }

    fn verify(&self, new_pid: u32, policy: &RestartPolicy) -> Result<(), RestartError> {
        if policy.verify_wait.is_zero() {
            return Ok(());
        }
        self.control.sleep(policy.verify_wait);
        if self.control.is_alive(new_pid) {
            return Ok(());
        }
        log_event!(
            self.log,
            ERROR,
            event_names::VERIFY_FAILED,
            Stage::Verify,
            format!("new process {} exited during verification", new_pid),
            new_pid = new_pid
        );
        Err(RestartError::VerifyFailed { new_pid })
    }

    fn fail_on_err<T>(
        &self,
        pid: u32,
        from: RestartState,
        result: Result<T, RestartError>,
    ) -> Result<T, RestartError> {
        if result.is_err() {
            self.transition(pid, from, RestartState::Failed);
        }
        result
    }

    fn transition(&self, pid: u32, from: RestartState, to: RestartState) {
        tracing::trace!(
            run_id = %self.log.run_id,
            pid = pid,
            from = %from,
            to = %to,
            "restart state change"
        );
    }
}
