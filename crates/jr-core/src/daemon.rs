//! Periodic scan-and-inject loop.
//!
//! Each pass discovers Java processes with the configured filter, keeps the
//! ones that still need an agent and batch-injects them. Between passes the
//! loop sleeps in short slices so a cancelled token (SIGINT/SIGTERM) stops it
//! promptly. A failed pass is logged and the next pass runs as scheduled.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use jr_common::Config;

use crate::classify::AgentDescriptor;
use crate::inject::{BatchSummary, CancelToken, Injector};
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::policy::{FilterSet, ProcessFilter};

/// Granularity of the between-pass sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(200);
const RECENT_EVENTS: usize = 100;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("cannot write pid file {path}: {source}")]
    PidFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot install signal handlers: {0}")]
    Signals(#[source] io::Error),
}

impl From<DaemonError> for jr_common::Error {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::PidFile { source, .. } | DaemonError::Signals(source) => {
                jr_common::Error::Io(source)
            }
        }
    }
}

/// Loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonOptions {
    pub interval: Duration,
    /// Run a single pass and return.
    pub once: bool,
    pub pid_file: Option<PathBuf>,
    /// When false, candidates are only reported.
    pub auto_restart: bool,
}

impl DaemonOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.daemon.interval_secs.max(1)),
            once: false,
            pid_file: config.daemon.pid_file.as_ref().map(PathBuf::from),
            auto_restart: config.process.auto_restart,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonEventType {
    Started,
    Stopped,
    PassCompleted,
    PassFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub timestamp: String,
    pub event_type: DaemonEventType,
    pub detail: String,
}

/// Counters across the lifetime of one daemon run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub started_at: String,
    pub pass_count: u64,
    pub last_pass_at: Option<String>,
    pub injected_total: u64,
    pub failed_total: u64,
    pub recent_events: VecDeque<DaemonEvent>,
}

impl DaemonState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now().to_rfc3339(),
            pass_count: 0,
            last_pass_at: None,
            injected_total: 0,
            failed_total: 0,
            recent_events: VecDeque::with_capacity(RECENT_EVENTS),
        }
    }

    pub fn record_event(&mut self, event_type: DaemonEventType, detail: &str) {
        if self.recent_events.len() >= RECENT_EVENTS {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(DaemonEvent {
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            detail: detail.to_string(),
        });
    }
}

impl Default for DaemonState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub pass_number: u64,
    /// Entries in the process table.
    pub scanned: usize,
    /// Java processes that matched the filter.
    pub discovered: usize,
    /// Pids that still needed an agent.
    pub candidates: Vec<u32>,
    pub summary: BatchSummary,
    /// Set when discovery failed and nothing else ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Daemon {
    injector: Injector,
    filter: FilterSet,
    agents: Vec<AgentDescriptor>,
    options: DaemonOptions,
    state: DaemonState,
    log: LogContext,
}

impl Daemon {
    pub fn new(
        injector: Injector,
        filter: ProcessFilter,
        agents: Vec<AgentDescriptor>,
        options: DaemonOptions,
    ) -> Self {
        let log = injector.log().clone();
        Self {
            filter: FilterSet::new(filter, &log),
            injector,
            agents,
            options,
            state: DaemonState::new(),
            log,
        }
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Discover, select and inject once.
    pub fn run_pass(&mut self, cancel: &CancelToken) -> PassOutcome {
        self.state.pass_count += 1;
        self.state.last_pass_at = Some(Utc::now().to_rfc3339());
        let pass_number = self.state.pass_count;

        let report = match self.injector.discover(&self.filter, cancel) {
            Ok(r) => r,
            Err(e) => {
                let detail = e.to_string();
                log_event!(
                    self.log,
                    ERROR,
                    event_names::DAEMON_PASS,
                    Stage::Daemon,
                    format!("pass {} failed: {}", pass_number, detail),
                    pass = pass_number
                );
                self.state.record_event(DaemonEventType::PassFailed, &detail);
                return PassOutcome {
                    pass_number,
                    scanned: 0,
                    discovered: 0,
                    candidates: Vec::new(),
                    summary: BatchSummary::default(),
                    error: Some(detail),
                };
            }
        };

        let discovered = report.processes.len();
        let targets: Vec<_> = report
            .processes
            .into_iter()
            .filter(|p| self.injector.needs_injection(p, &self.agents))
            .collect();
        let candidates: Vec<u32> = targets.iter().map(|p| p.pid()).collect();

        let summary = if targets.is_empty() || !self.options.auto_restart {
            BatchSummary::default()
        } else {
            let results = self.injector.batch_inject(&targets, &self.agents, cancel);
            BatchSummary::from_results(&results)
        };
        self.state.injected_total += summary.succeeded as u64;
        self.state.failed_total += summary.failed as u64;

        let detail = format!(
            "pass {}: {} discovered of {} scanned, {} need injection, {} injected, {} failed",
            pass_number,
            discovered,
            report.scanned,
            candidates.len(),
            summary.succeeded,
            summary.failed
        );
        log_event!(
            self.log,
            INFO,
            event_names::DAEMON_PASS,
            Stage::Daemon,
            &detail,
            pass = pass_number,
            discovered = discovered as u64,
            candidates = candidates.len() as u64,
            injected = summary.succeeded as u64,
            failed = summary.failed as u64,
            auto_restart = self.options.auto_restart
        );
        self.state.record_event(DaemonEventType::PassCompleted, &detail);

        PassOutcome {
            pass_number,
            scanned: report.scanned,
            discovered,
            candidates,
            summary,
            error: None,
        }
    }

    /// Run until cancelled, or for one pass with `once`.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<&DaemonState, DaemonError> {
        let _pid_file = match &self.options.pid_file {
            Some(path) => Some(PidFile::create(path)?),
            None => None,
        };

        let interval_secs = self.options.interval.as_secs();
        log_event!(
            self.log,
            INFO,
            event_names::DAEMON_STARTED,
            Stage::Daemon,
            format!(
                "daemon started: {} agent(s), interval {}s",
                self.agents.len(),
                interval_secs
            ),
            interval_secs = interval_secs,
            once = self.options.once
        );
        self.state.record_event(DaemonEventType::Started, "started");

        while !cancel.is_cancelled() {
            self.run_pass(cancel);
            if self.options.once || sleep_unless_cancelled(self.options.interval, cancel) {
                break;
            }
        }

        log_event!(
            self.log,
            INFO,
            event_names::DAEMON_STOPPED,
            Stage::Shutdown,
            format!(
                "daemon stopped after {} pass(es); {} injected, {} failed",
                self.state.pass_count, self.state.injected_total, self.state.failed_total
            ),
            passes = self.state.pass_count
        );
        self.state.record_event(DaemonEventType::Stopped, "stopped");
        Ok(&self.state)
    }
}

/// Sleep for `total` in slices. Returns true if cancelled meanwhile.
pub fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return true;
        }
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
    cancel.is_cancelled()
}

/// Route SIGINT and SIGTERM onto the token's flag.
pub fn install_signal_handlers(cancel: &CancelToken) -> Result<(), DaemonError> {
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, cancel.flag()).map_err(DaemonError::Signals)?;
    }
    Ok(())
}

/// Pid file removed when dropped.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: &Path) -> Result<Self, DaemonError> {
        let err = |source| DaemonError::PidFile {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(err)?;
        }
        fs::write(path, format!("{}\n", std::process::id())).map_err(err)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
