//! Process control primitives behind a trait.
//!
//! The restart state machine only talks to [`ProcessControl`], so tests can
//! drive it with a scripted double while production uses
//! [`SystemProcessControl`] (signals, `/proc` and `fork/exec`).

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use super::signal::{self, Signal, SignalError};
use crate::collect::{InspectError, LaunchContext, ProcInspector};
use crate::log_event;
use crate::logging::{event_names, Stage};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("permission denied for process {0}")]
    PermissionDenied(u32),

    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("failed to capture launch context: {0}")]
    Capture(#[from] InspectError),
}

impl From<SignalError> for ControlError {
    fn from(err: SignalError) -> Self {
        match err {
            SignalError::NotFound(pid) => ControlError::NotFound(pid),
            SignalError::PermissionDenied(pid) => ControlError::PermissionDenied(pid),
            SignalError::Failed { pid, source } => ControlError::Signal {
                pid,
                reason: source.to_string(),
            },
        }
    }
}

/// What to launch and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Raw argument bytes, launcher first.
    pub argv: Vec<OsString>,
    /// Working directory and environment overrides from the old process.
    pub context: LaunchContext,
}

/// OS operations the restart orchestrator needs.
pub trait ProcessControl {
    /// Working directory and environment of a live process.
    fn capture(&self, pid: u32) -> Result<LaunchContext, ControlError>;

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), ControlError>;

    /// True if the process exited within `timeout`.
    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool;

    /// Start a detached process; returns its pid.
    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, ControlError>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Effective uid of the caller.
    fn caller_uid(&self) -> u32;

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Exit statuses kept for `exit_status`; older ones are evicted first.
const REAPED_LIMIT: usize = 64;

/// Exit statuses of children we spawned, filled by reaper threads.
///
/// Only a record of how a child ended. Liveness never consults it: a pid
/// freed by reaping can be reused by an unrelated process.
#[derive(Debug, Default)]
struct ReapedChildren {
    order: VecDeque<u32>,
    statuses: HashMap<u32, ExitStatus>,
}

impl ReapedChildren {
    fn record(&mut self, pid: u32, status: ExitStatus) {
        if self.statuses.insert(pid, status).is_none() {
            self.order.push_back(pid);
        }
        while self.order.len() > REAPED_LIMIT {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    /// Drop the entry of a pid the kernel handed out again.
    fn forget(&mut self, pid: u32) {
        if self.statuses.remove(&pid).is_some() {
            self.order.retain(|&p| p != pid);
        }
    }

    fn get(&self, pid: u32) -> Option<ExitStatus> {
        self.statuses.get(&pid).copied()
    }
}

type SharedReaped = Arc<Mutex<ReapedChildren>>;

/// Real process control for Linux.
pub struct SystemProcessControl {
    inspector: ProcInspector,
    reaped: SharedReaped,
    poll_interval: Duration,
}

impl SystemProcessControl {
    pub fn new(inspector: ProcInspector) -> Self {
        Self {
            inspector,
            reaped: Arc::new(Mutex::new(ReapedChildren::default())),
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Exit status of a recent child we spawned, once it has exited.
    pub fn exit_status(&self, pid: u32) -> Option<ExitStatus> {
        self.lock_reaped().get(pid)
    }

    fn lock_reaped(&self) -> std::sync::MutexGuard<'_, ReapedChildren> {
        match self.reaped.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn reap_in_background(&self, mut child: std::process::Child) {
        let pid = child.id();
        let reaped = Arc::clone(&self.reaped);
        let spawned = thread::Builder::new()
            .name(format!("jr-reaper-{}", pid))
            .spawn(move || {
                if let Ok(status) = child.wait() {
                    if let Ok(mut children) = reaped.lock() {
                        children.record(pid, status);
                    }
                }
            });
        if let Err(e) = spawned {
            log_event!(
                self.inspector.log(),
                WARN,
                event_names::INTERNAL_ERROR,
                Stage::Start,
                format!("no reaper thread for process {}: {}", pid, e),
                pid = pid
            );
        }
    }
}

/// Liveness of an arbitrary pid: exists, and is not a zombie.
fn pid_alive(inspector_root: &std::path::Path, pid: u32) -> bool {
    if !signal::process_exists(pid) {
        return false;
    }
    let stat = inspector_root.join(pid.to_string()).join("stat");
    match std::fs::read_to_string(stat)
        .ok()
        .and_then(|c| crate::collect::proc_parsers::parse_stat_content(&c))
    {
        Some(info) => !crate::collect::ProcessState::from_char(info.state).is_gone(),
        None => true,
    }
}

impl ProcessControl for SystemProcessControl {
    fn capture(&self, pid: u32) -> Result<LaunchContext, ControlError> {
        Ok(self.inspector.capture_launch_context(pid)?)
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), ControlError> {
        Ok(signal::send_signal(pid, signal)?)
    }

    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let root = self.inspector.root().to_path_buf();
        signal::wait_for_exit(pid, timeout, self.poll_interval, move |p| pid_alive(&root, p))
    }

    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, ControlError> {
        let (program, args) = spec.argv.split_first().ok_or_else(|| ControlError::Spawn {
            program: String::new(),
            reason: "empty command line".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.context.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if !spec.context.cwd.as_os_str().is_empty() {
            cmd.current_dir(&spec.context.cwd);
        }

        // New session: the replacement must outlive us and our terminal.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| ControlError::Spawn {
            program: program.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;
        let pid = child.id();
        self.lock_reaped().forget(pid);
        self.reap_in_background(child);
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(self.inspector.root(), pid)
    }

    fn caller_uid(&self) -> u32 {
        unsafe { libc::geteuid() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_log_context, ProcessHarness};

    fn control() -> SystemProcessControl {
        SystemProcessControl::new(ProcInspector::new(test_log_context()))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_spawn_empty_argv_fails() {
        let spec = LaunchSpec {
            argv: vec![],
            context: LaunchContext::default(),
        };
        assert!(matches!(
            control().spawn(&spec),
            Err(ControlError::Spawn { .. })
        ));
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let spec = LaunchSpec {
            argv: vec!["/nonexistent/jr-test-binary".into()],
            context: LaunchContext::default(),
        };
        let err = control().spawn(&spec).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/jr-test-binary"));
    }

    #[test]
    fn test_spawned_child_exit_is_observed() {
        if !ProcessHarness::is_available() {
            return;
        }
        let ctl = control();
        let pid = ctl
            .spawn(&LaunchSpec {
                argv: vec!["sh".into(), "-c".into(), "exit 3".into()],
                context: LaunchContext::default(),
            })
            .unwrap();
        assert!(ctl.wait_for_exit(pid, Duration::from_secs(5)));
        assert!(!ctl.is_alive(pid));
        // The reaper records the status just after the zombie is visible.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ctl.exit_status(pid).is_none() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ctl.exit_status(pid).and_then(|s| s.code()), Some(3));
    }

    #[test]
    fn test_spawn_applies_cwd_and_env() {
        if !ProcessHarness::is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut env = HashMap::new();
        env.insert(OsString::from("JR_TEST_MARKER"), OsString::from("present"));
        let ctl = control();
        let pid = ctl
            .spawn(&LaunchSpec {
                argv: vec![
                    "sh".into(),
                    "-c".into(),
                    "printf '%s %s' \"$JR_TEST_MARKER\" \"$(pwd)\" > out.txt".into(),
                ],
                context: LaunchContext {
                    cwd: dir.path().to_path_buf(),
                    env,
                },
            })
            .unwrap();
        assert!(ctl.wait_for_exit(pid, Duration::from_secs(5)));
        let written = std::fs::read_to_string(out).unwrap();
        assert!(written.starts_with("present "));
    }

    #[test]
    fn test_spawn_passes_non_utf8_argument_bytes() {
        use std::os::unix::ffi::OsStringExt;

        if !ProcessHarness::is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let ctl = control();
        let pid = ctl
            .spawn(&LaunchSpec {
                argv: vec![
                    "sh".into(),
                    "-c".into(),
                    "printf '%s' \"$1\" > out.bin".into(),
                    "sh".into(),
                    OsString::from_vec(b"caf\xe9".to_vec()),
                ],
                context: LaunchContext {
                    cwd: dir.path().to_path_buf(),
                    env: HashMap::new(),
                },
            })
            .unwrap();
        assert!(ctl.wait_for_exit(pid, Duration::from_secs(5)));
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"caf\xe9");
    }

    #[test]
    fn test_stale_exit_status_does_not_mask_live_pid() {
        use std::os::unix::process::ExitStatusExt;

        if !ProcessHarness::is_available() {
            return;
        }
        let handle = ProcessHarness.spawn_sleep(30).unwrap();
        let ctl = control();
        // An earlier child that used the same pid.
        ctl.lock_reaped().record(handle.pid(), ExitStatus::from_raw(0));

        assert!(ctl.is_alive(handle.pid()));
        assert!(!ctl.wait_for_exit(handle.pid(), Duration::from_millis(100)));
    }

    #[test]
    fn test_reaped_children_bounded_and_forgettable() {
        use std::os::unix::process::ExitStatusExt;

        let mut reaped = ReapedChildren::default();
        for pid in 1..=(REAPED_LIMIT as u32 + 10) {
            reaped.record(pid, ExitStatus::from_raw(0));
        }
        assert_eq!(reaped.statuses.len(), REAPED_LIMIT);
        assert!(reaped.get(1).is_none());
        assert!(reaped.get(REAPED_LIMIT as u32 + 10).is_some());

        reaped.forget(REAPED_LIMIT as u32 + 10);
        assert!(reaped.get(REAPED_LIMIT as u32 + 10).is_none());
        assert_eq!(reaped.order.len(), REAPED_LIMIT - 1);

        // Re-recording a pid does not duplicate it in the eviction order.
        reaped.record(20, ExitStatus::from_raw(256));
        assert_eq!(reaped.order.len(), REAPED_LIMIT - 1);
        assert_eq!(reaped.get(20).and_then(|s| s.code()), Some(1));
    }

    #[test]
    fn test_terminate_real_process() {
        if !ProcessHarness::is_available() {
            return;
        }
        let handle = ProcessHarness.spawn_sleep(30).unwrap();
        let ctl = control();
        assert!(ctl.is_alive(handle.pid()));
        ctl.signal(handle.pid(), Signal::Terminate).unwrap();
        // The harness owns the child, so reaping happens through it.
        assert!(handle.wait_for_exit(Duration::from_secs(5)));
        assert!(!ctl.is_alive(handle.pid()));
    }

    #[test]
    fn test_caller_uid_matches_libc() {
        assert_eq!(control().caller_uid(), unsafe { libc::geteuid() });
    }
}
