//! Batch coordinator.
//!
//! [`Injector`] ties the pipeline together: discovery (inspect, classify,
//! filter), the injection gate, and the sequential batch loop that rewrites
//! and restarts one target at a time.

mod cancel;
mod result;

pub use cancel::CancelToken;
pub use result::{BatchSummary, DiscoveryReport, FailureKind, InjectionPlan, InjectionResult};

use std::time::Instant;

use chrono::Utc;

use jr_common::Config;

use crate::action::{
    ProcessControl, RestartOrchestrator, RestartPlan, RestartPolicy, SystemProcessControl,
};
use crate::classify::{classify, AgentDescriptor, ClassifiedProcess};
use crate::collect::{DiscoveryError, InspectError, ProcInspector};
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::policy::{missing_agents, needs_injection, ExclusionSet, FilterSet};
use crate::rewrite::build_command_line;

/// Which processes a discovery pass keeps before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryScope {
    #[default]
    JavaOnly,
    All,
}

pub struct Injector {
    inspector: ProcInspector,
    control: Box<dyn ProcessControl>,
    exclusions: ExclusionSet,
    policy: RestartPolicy,
    check_permissions: bool,
    self_pid: u32,
    log: LogContext,
}

impl Injector {
    pub fn new(inspector: ProcInspector, control: Box<dyn ProcessControl>, log: LogContext) -> Self {
        Self {
            inspector,
            control,
            exclusions: ExclusionSet::empty(),
            policy: RestartPolicy::default(),
            check_permissions: true,
            self_pid: std::process::id(),
            log,
        }
    }

    /// Injector over the host's `/proc` with real process control.
    pub fn from_config(config: &Config, log: LogContext) -> Self {
        let control = SystemProcessControl::new(ProcInspector::new(log.clone()));
        Self::new(ProcInspector::new(log.clone()), Box::new(control), log.clone())
            .with_exclusions(ExclusionSet::from_config(&config.exclude, &log))
            .with_policy(RestartPolicy::from(&config.restart))
            .with_permission_check(config.security.check_permissions)
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_permission_check(mut self, enabled: bool) -> Self {
        self.check_permissions = enabled;
        self
    }

    /// Pid never treated as a target. Defaults to our own.
    pub fn with_self_pid(mut self, pid: u32) -> Self {
        self.self_pid = pid;
        self
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    /// Java processes matching `filter`.
    pub fn discover(
        &self,
        filter: &FilterSet,
        cancel: &CancelToken,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        self.discover_in(DiscoveryScope::JavaOnly, filter, cancel)
    }

    /// Enumerate, inspect, classify and filter. Per-process read failures
    /// are counted and skipped; only an unreadable table is fatal.
    pub fn discover_in(
        &self,
        scope: DiscoveryScope,
        filter: &FilterSet,
        cancel: &CancelToken,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        if cancel.is_cancelled() {
            log_event!(
                self.log,
                INFO,
                event_names::SCAN_CANCELLED,
                Stage::Discover,
                "scan cancelled before start"
            );
            return Err(DiscoveryError::Cancelled);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        log_event!(
            self.log,
            DEBUG,
            event_names::SCAN_STARTED,
            Stage::Discover,
            format!("scanning {}", self.inspector.root().display())
        );

        let pids = self.inspector.list_pids()?;
        self.inspector.refresh_users();
        let mut processes = Vec::new();
        let mut skipped = 0usize;

        for &pid in &pids {
            if pid == self.self_pid {
                continue;
            }
            let snapshot = match self.inspector.inspect(pid) {
                Ok(s) => s,
                Err(e) => {
                    skipped += 1;
                    log_event!(
                        self.log,
                        DEBUG,
                        event_names::PROCESS_UNREADABLE,
                        Stage::Discover,
                        format!("skipping process {}: {}", pid, e),
                        pid = pid
                    );
                    continue;
                }
            };

            let process = classify(snapshot);
            if scope == DiscoveryScope::JavaOnly && !process.is_java {
                continue;
            }
            if filter.matches(&process) {
                processes.push(process);
            }
        }

        let duration_ms = clock.elapsed().as_millis() as u64;
        log_event!(
            self.log,
            INFO,
            event_names::SCAN_FINISHED,
            Stage::Discover,
            format!(
                "found {} matching process(es) among {} ({} unreadable)",
                processes.len(),
                pids.len(),
                skipped
            ),
            matched = processes.len() as u64,
            scanned = pids.len() as u64,
            skipped = skipped as u64,
            duration_ms = duration_ms
        );

        Ok(DiscoveryReport {
            processes,
            scanned: pids.len(),
            skipped,
            started_at,
            duration_ms,
        })
    }

    /// [`needs_injection`] against this injector's exclusions, logging the
    /// rule that vetoes a process.
    pub fn needs_injection(&self, process: &ClassifiedProcess, agents: &[AgentDescriptor]) -> bool {
        if let Some(rule) = self.exclusions.matching_rule(process) {
            log_event!(
                self.log,
                DEBUG,
                event_names::FILTER_EXCLUDED,
                Stage::Filter,
                format!("process {} excluded by rule {:?}", process.pid(), rule),
                pid = process.pid(),
                rule = rule
            );
        }
        needs_injection(process, agents, &self.exclusions)
    }

    /// The subset of `agents` the process does not carry yet.
    pub fn agents_for(
        &self,
        process: &ClassifiedProcess,
        agents: &[AgentDescriptor],
    ) -> Vec<AgentDescriptor> {
        missing_agents(process, agents)
    }

    /// Rewritten command line without touching the process.
    pub fn plan(&self, process: &ClassifiedProcess, agents: &[AgentDescriptor]) -> InjectionPlan {
        InjectionPlan {
            pid: process.pid(),
            agents: agents.to_vec(),
            old_command_line: process.snapshot.cmdline.clone(),
            new_command_line: build_command_line(&process.snapshot.cmdline, agents),
        }
    }

    /// Relaunch plan built from the raw argument bytes.
    fn restart_plan(&self, process: &ClassifiedProcess, agents: &[AgentDescriptor]) -> RestartPlan {
        RestartPlan {
            old_pid: process.pid(),
            command_line: build_command_line(&process.snapshot.launch_argv(), agents),
            policy: self.policy.clone(),
        }
    }

    fn permitted(&self, process: &ClassifiedProcess) -> bool {
        if !self.check_permissions {
            return true;
        }
        let caller = self.control.caller_uid();
        caller == 0 || caller == process.snapshot.uid
    }

    /// Inject `agents` into one process: permission check, rewrite, restart,
    /// then read the agents back from the replacement.
    pub fn inject(&self, process: &ClassifiedProcess, agents: &[AgentDescriptor]) -> InjectionResult {
        let pid = process.pid();
        let result = InjectionResult::pending(process);

        let result = if !self.permitted(process) {
            result.fail(
                FailureKind::Permission,
                format!(
                    "permission denied: process {} is owned by {} (uid {})",
                    pid, process.snapshot.user, process.snapshot.uid
                ),
                None,
            )
        } else {
            self.restart_with(process, agents, result)
        };

        if result.success {
            log_event!(
                self.log,
                INFO,
                event_names::INJECT_RESULT,
                Stage::Inject,
                &result.message,
                pid = pid,
                new_pid = result.new_pid,
                success = true
            );
        } else {
            let failure = result.failure.map(|k| k.to_string()).unwrap_or_default();
            log_event!(
                self.log,
                ERROR,
                event_names::INJECT_RESULT,
                Stage::Inject,
                &result.message,
                pid = pid,
                success = false,
                failure = failure.as_str()
            );
        }
        result
    }

    fn restart_with(
        &self,
        process: &ClassifiedProcess,
        agents: &[AgentDescriptor],
        mut result: InjectionResult,
    ) -> InjectionResult {
        let pid = process.pid();
        result.new_command_line = build_command_line(&process.snapshot.cmdline, agents);
        let plan = self.restart_plan(process, agents);

        match RestartOrchestrator::new(self.control.as_ref(), &self.log).run(&plan) {
            Ok(outcome) => {
                result.success = true;
                result.new_pid = outcome.new_pid;
                result.attempts = outcome.attempts;
                result.message = format!(
                    "injected {} agent(s); process {} restarted as {}",
                    agents.len(),
                    pid,
                    outcome.new_pid
                );
                result.new_agents = self.read_agents(outcome.new_pid, agents);
                result
            }
            Err(e) => {
                let kind = FailureKind::from(&e);
                result.fail(
                    kind,
                    format!("failed to restart process {}: {}", pid, e),
                    Some(e.to_string()),
                )
            }
        }
    }

    /// Agents of the replacement; empty if it cannot be re-read.
    fn read_agents(&self, new_pid: u32, expected: &[AgentDescriptor]) -> Vec<AgentDescriptor> {
        let process = match self.inspector.inspect(new_pid) {
            Ok(snapshot) => classify(snapshot),
            Err(e) => {
                log_event!(
                    self.log,
                    DEBUG,
                    event_names::PROCESS_UNREADABLE,
                    Stage::Verify,
                    format!("cannot re-read process {}: {}", new_pid, e),
                    pid = new_pid
                );
                return Vec::new();
            }
        };
        let missing = missing_agents(&process, expected);
        if !missing.is_empty() {
            log_event!(
                self.log,
                WARN,
                event_names::AGENTS_MISSING,
                Stage::Verify,
                format!(
                    "process {} is running without {} expected agent(s)",
                    new_pid,
                    missing.len()
                ),
                pid = new_pid
            );
        }
        process.agents
    }

    /// Inject into each target in order. Never fails as a whole; cancellation
    /// is observed only between targets.
    pub fn batch_inject(
        &self,
        targets: &[ClassifiedProcess],
        agents: &[AgentDescriptor],
        cancel: &CancelToken,
    ) -> Vec<InjectionResult> {
        log_event!(
            self.log,
            INFO,
            event_names::INJECT_STARTED,
            Stage::Inject,
            format!("injecting into {} process(es)", targets.len()),
            targets = targets.len() as u64
        );

        let mut results = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                log_event!(
                    self.log,
                    WARN,
                    event_names::INJECT_CANCELLED,
                    Stage::Inject,
                    format!(
                        "batch cancelled; {} target(s) not processed",
                        targets.len() - index
                    ),
                    skipped = (targets.len() - index) as u64
                );
                break;
            }

            let wanted = self.agents_for(target, agents);
            let result = if wanted.is_empty() {
                InjectionResult::pending(target).fail(
                    FailureKind::AlreadyInstrumented,
                    format!("process {} already carries every requested agent", target.pid()),
                    None,
                )
            } else {
                self.inject(target, &wanted)
            };
            results.push(result);
        }

        let summary = BatchSummary::from_results(&results);
        log_event!(
            self.log,
            INFO,
            event_names::INJECT_FINISHED,
            Stage::Inject,
            format!(
                "batch finished: {} succeeded, {} failed, {} skipped",
                summary.succeeded, summary.failed, summary.skipped
            ),
            succeeded = summary.succeeded as u64,
            failed = summary.failed as u64
        );
        results
    }

    /// Expected agents absent from a running process; empty means fully
    /// instrumented.
    pub fn validate(
        &self,
        pid: u32,
        expected: &[AgentDescriptor],
    ) -> Result<Vec<AgentDescriptor>, InspectError> {
        let process = classify(self.inspector.inspect(pid)?);
        Ok(missing_agents(&process, expected))
    }
}
