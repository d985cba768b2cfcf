//! Test utilities for jr-core.
//!
//! - A capturing `tracing` subscriber for scoped log assertions
//! - `FakeProcFs`: a synthetic procfs tree in a tempdir
//! - `ScriptedControl`: a deterministic `ProcessControl` double
//! - `ProcessHarness`: real child processes for no-mock tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::action::{ControlError, LaunchSpec, ProcessControl, Signal};
use crate::collect::{LaunchContext, ProcInspector};
use crate::logging::LogContext;

// ============================================================================
// Log capture
// ============================================================================

/// Shared in-memory sink for formatted log lines.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn contents(&self) -> String {
        let guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        String::from_utf8_lossy(&guard).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut guard) = self.inner.lock() {
            guard.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A subscriber writing every event at TRACE and above into a buffer.
///
/// Install it for one closure with `tracing::subscriber::with_default`.
pub fn capturing_subscriber() -> (impl tracing::Subscriber + Send + Sync, LogBuffer) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    (subscriber, buffer)
}

pub fn test_log_context() -> LogContext {
    LogContext::new("run-test", "host-test")
}

// ============================================================================
// FakeProcFs
// ============================================================================

/// A procfs-shaped directory tree for hermetic inspector tests.
///
/// Layout: `<tmp>/proc/<pid>/{cmdline,status,...}`, `<tmp>/proc/stat` and
/// `<tmp>/passwd`.
pub struct FakeProcFs {
    dir: tempfile::TempDir,
}

impl FakeProcFs {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        std::fs::create_dir_all(dir.path().join("proc"))
            .unwrap_or_else(|e| panic!("create proc dir: {e}"));
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("proc")
    }

    pub fn passwd_path(&self) -> PathBuf {
        self.dir.path().join("passwd")
    }

    /// Inspector rooted at this tree.
    pub fn inspector(&self, log: LogContext) -> ProcInspector {
        ProcInspector::with_root(self.root(), log).with_passwd(self.passwd_path())
    }

    pub fn set_boot_time(&self, btime: u64) {
        let content = format!("cpu  1 2 3 4 5 6 7 0 0 0\nbtime {}\nprocesses 100\n", btime);
        write_file(&self.root().join("stat"), content.as_bytes());
    }

    pub fn add_user(&self, name: &str, uid: u32) {
        let line = format!("{name}:x:{uid}:{uid}::/home/{name}:/bin/sh\n");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.passwd_path())
            .unwrap_or_else(|e| panic!("open passwd: {e}"));
        file.write_all(line.as_bytes())
            .unwrap_or_else(|e| panic!("write passwd: {e}"));
    }

    pub fn process(&self, pid: u32) -> FakeProcessBuilder<'_> {
        FakeProcessBuilder {
            fs: self,
            pid,
            files: HashMap::new(),
            links: HashMap::new(),
            stat_state: None,
            stat_starttime: None,
            fds: 0,
        }
    }

    /// Remove a process directory, as if it exited.
    pub fn remove(&self, pid: u32) {
        let _ = std::fs::remove_dir_all(self.root().join(pid.to_string()));
    }
}

impl Default for FakeProcFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one fake `/proc/<pid>` directory.
pub struct FakeProcessBuilder<'a> {
    fs: &'a FakeProcFs,
    pid: u32,
    files: HashMap<&'static str, Vec<u8>>,
    links: HashMap<&'static str, String>,
    stat_state: Option<char>,
    stat_starttime: Option<u64>,
    fds: u32,
}

impl FakeProcessBuilder<'_> {
    pub fn cmdline(mut self, args: &[&str]) -> Self {
        let mut raw = Vec::new();
        for arg in args {
            raw.extend_from_slice(arg.as_bytes());
            raw.push(0);
        }
        self.files.insert("cmdline", raw);
        self
    }

    pub fn status(mut self, name: &str, state: char, uid: u32) -> Self {
        let content = format!(
            "Name:\t{name}\nState:\t{state} (fake)\nPid:\t{pid}\nPPid:\t1\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t{uid}\t{uid}\t{uid}\t{uid}\nThreads:\t2\n",
            pid = self.pid
        );
        self.files.insert("status", content.into_bytes());
        self
    }

    pub fn environ(mut self, vars: &[(&str, &str)]) -> Self {
        let mut raw = Vec::new();
        for (k, v) in vars {
            raw.extend_from_slice(format!("{k}={v}").as_bytes());
            raw.push(0);
        }
        self.files.insert("environ", raw);
        self
    }

    pub fn stat_starttime(mut self, ticks: u64) -> Self {
        self.stat_starttime = Some(ticks);
        self
    }

    pub fn stat_state(mut self, state: char) -> Self {
        self.stat_state = Some(state);
        self
    }

    /// statm with `size` virtual and `resident` pages.
    pub fn statm(mut self, size: u64, resident: u64) -> Self {
        let content = format!("{size} {resident} 10 5 0 {} 0\n", size / 2);
        self.files.insert("statm", content.into_bytes());
        self
    }

    pub fn cwd(mut self, path: &str) -> Self {
        self.links.insert("cwd", path.to_string());
        self
    }

    pub fn exe(mut self, path: &str) -> Self {
        self.links.insert("exe", path.to_string());
        self
    }

    pub fn fds(mut self, count: u32) -> Self {
        self.fds = count;
        self
    }

    pub fn raw_file(mut self, name: &'static str, content: &[u8]) -> Self {
        self.files.insert(name, content.to_vec());
        self
    }

    pub fn create(self) {
        let dir = self.fs.root().join(self.pid.to_string());
        std::fs::create_dir_all(&dir).unwrap_or_else(|e| panic!("create {dir:?}: {e}"));

        for (name, content) in &self.files {
            write_file(&dir.join(name), content);
        }

        if self.stat_state.is_some() || self.stat_starttime.is_some() {
            let content = format!(
                "{pid} (fake) {state} 1 {pid} {pid} 0 -1 0 0 0 0 0 0 0 0 0 20 0 2 0 {start} 1000 10\n",
                pid = self.pid,
                state = self.stat_state.unwrap_or('S'),
                start = self.stat_starttime.unwrap_or(0),
            );
            write_file(&dir.join("stat"), content.as_bytes());
        }

        #[cfg(unix)]
        for (name, target) in &self.links {
            std::os::unix::fs::symlink(target, dir.join(name))
                .unwrap_or_else(|e| panic!("symlink {name}: {e}"));
        }

        if self.fds > 0 {
            let fd_dir = dir.join("fd");
            std::fs::create_dir_all(&fd_dir).unwrap_or_else(|e| panic!("create fd dir: {e}"));
            for fd in 0..self.fds {
                write_file(&fd_dir.join(fd.to_string()), b"");
            }
        }
    }
}

fn write_file(path: &Path, content: &[u8]) {
    std::fs::write(path, content).unwrap_or_else(|e| panic!("write {path:?}: {e}"));
}

// ============================================================================
// Process Harness (no-mock integration tests)
// ============================================================================

/// Lightweight process harness for spawning real processes in tests.
#[derive(Debug, Default)]
pub struct ProcessHarness;

impl ProcessHarness {
    /// Return true if the current platform supports spawning test processes.
    pub fn is_available() -> bool {
        #[cfg(target_os = "linux")]
        {
            if !Path::new("/proc").exists() {
                return false;
            }
            std::process::Command::new("sh")
                .arg("-c")
                .arg("true")
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }

    /// Spawn a shell command and return a handle.
    pub fn spawn_shell(&self, cmd: &str) -> std::io::Result<ProcessHandle> {
        ProcessHandle::spawn("sh", &["-c", cmd])
    }

    /// Spawn a sleep process for the given duration (seconds).
    pub fn spawn_sleep(&self, seconds: u64) -> std::io::Result<ProcessHandle> {
        ProcessHandle::spawn("sleep", &[&seconds.max(1).to_string()])
    }

    /// Spawn a shell that ignores SIGTERM, so only SIGKILL stops it.
    pub fn spawn_term_ignoring(&self, seconds: u64) -> std::io::Result<ProcessHandle> {
        self.spawn_shell(&format!(
            "trap '' TERM; i=0; while [ $i -lt {} ]; do sleep 1; i=$((i+1)); done",
            seconds.max(1)
        ))
    }
}

/// Handle to a spawned process for test control. Killed on drop.
pub struct ProcessHandle {
    pid: u32,
    child: Mutex<std::process::Child>,
}

impl ProcessHandle {
    fn spawn(program: &str, args: &[&str]) -> std::io::Result<Self> {
        let child = std::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        let pid = child.id();
        Ok(Self {
            pid,
            child: Mutex::new(child),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Check if the process is still running (reaps it if it exited).
    pub fn is_running(&self) -> bool {
        let Ok(mut child) = self.child.lock() else {
            return false;
        };
        matches!(child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit, returning true if it exited before timeout.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.is_running() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// ============================================================================
// Scripted process control
// ============================================================================

/// One recorded call against [`ScriptedControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Capture(u32),
    Signal(u32, Signal),
    Wait(u32, Duration),
    Spawn(Vec<OsString>),
    Sleep(Duration),
}

#[derive(Debug, Default)]
struct ScriptState {
    caller_uid: u32,
    contexts: HashMap<u32, LaunchContext>,
    live: HashSet<u32>,
    ignores_term: HashSet<u32>,
    ignores_kill: HashSet<u32>,
    signal_errors: HashMap<u32, String>,
    spawn_failures: VecDeque<String>,
    crash_after_start: bool,
    next_pid: u32,
    spawned: Vec<LaunchSpec>,
    calls: Vec<ControlCall>,
}

/// Deterministic [`ProcessControl`] double.
///
/// Processes are pids in a set; signals remove them unless told otherwise;
/// spawns allocate pids from a counter; sleeps are recorded, not slept.
#[derive(Debug)]
pub struct ScriptedControl {
    state: Mutex<ScriptState>,
}

impl ScriptedControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState {
                next_pid: 10_000,
                ..Default::default()
            }),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut ScriptState)) -> Self {
        f(&mut self.lock());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A live process with the given working directory and environment.
    pub fn with_process(self, pid: u32, cwd: &str, env: &[(&str, &str)]) -> Self {
        let context = LaunchContext {
            cwd: PathBuf::from(cwd),
            env: env
                .iter()
                .map(|(k, v)| (OsString::from(k), OsString::from(v)))
                .collect(),
        };
        self.with_state(|s| {
            s.contexts.insert(pid, context);
            s.live.insert(pid);
        })
    }

    pub fn with_caller_uid(self, uid: u32) -> Self {
        self.with_state(|s| s.caller_uid = uid)
    }

    /// First pid handed out by `spawn`.
    pub fn with_next_pid(self, pid: u32) -> Self {
        self.with_state(|s| s.next_pid = pid)
    }

    pub fn ignores_term(self, pid: u32) -> Self {
        self.with_state(|s| {
            s.ignores_term.insert(pid);
        })
    }

    pub fn ignores_kill(self, pid: u32) -> Self {
        self.with_state(|s| {
            s.ignores_kill.insert(pid);
        })
    }

    /// Every signal to `pid` fails with a generic error.
    pub fn signal_error(self, pid: u32, reason: &str) -> Self {
        self.with_state(|s| {
            s.signal_errors.insert(pid, reason.to_string());
        })
    }

    /// The next `count` spawns fail.
    pub fn fail_spawns(self, count: usize, reason: &str) -> Self {
        self.with_state(|s| {
            s.spawn_failures
                .extend(std::iter::repeat_n(reason.to_string(), count))
        })
    }

    /// Spawned processes die before anyone can probe them.
    pub fn crash_after_start(self) -> Self {
        self.with_state(|s| s.crash_after_start = true)
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.lock().calls.clone()
    }

    /// Launch specs passed to `spawn`, failed attempts included.
    pub fn spawned(&self) -> Vec<LaunchSpec> {
        self.lock().spawned.clone()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ControlCall::Sleep(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Old pids that received at least one signal.
    pub fn signalled(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ControlCall::Signal(pid, _) => Some(*pid),
                _ => None,
            })
            .collect();
        pids.dedup();
        pids
    }
}

impl Default for ScriptedControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for ScriptedControl {
    fn capture(&self, pid: u32) -> Result<LaunchContext, ControlError> {
        let mut s = self.lock();
        s.calls.push(ControlCall::Capture(pid));
        if !s.live.contains(&pid) {
            return Err(ControlError::NotFound(pid));
        }
        Ok(s.contexts.get(&pid).cloned().unwrap_or_default())
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), ControlError> {
        let mut s = self.lock();
        s.calls.push(ControlCall::Signal(pid, signal));
        if let Some(reason) = s.signal_errors.get(&pid) {
            return Err(ControlError::Signal {
                pid,
                reason: reason.clone(),
            });
        }
        if !s.live.contains(&pid) {
            return Err(ControlError::NotFound(pid));
        }
        let ignored = match signal {
            Signal::Terminate => s.ignores_term.contains(&pid),
            Signal::Kill => s.ignores_kill.contains(&pid),
        };
        if !ignored {
            s.live.remove(&pid);
        }
        Ok(())
    }

    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let mut s = self.lock();
        s.calls.push(ControlCall::Wait(pid, timeout));
        !s.live.contains(&pid)
    }

    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, ControlError> {
        let mut s = self.lock();
        s.calls.push(ControlCall::Spawn(spec.argv.clone()));
        s.spawned.push(spec.clone());
        if let Some(reason) = s.spawn_failures.pop_front() {
            return Err(ControlError::Spawn {
                program: spec
                    .argv
                    .first()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                reason,
            });
        }
        let pid = s.next_pid;
        s.next_pid += 1;
        if !s.crash_after_start {
            s.live.insert(pid);
            s.contexts.insert(pid, spec.context.clone());
        }
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.lock().live.contains(&pid)
    }

    fn caller_uid(&self) -> u32 {
        self.lock().caller_uid
    }

    fn sleep(&self, duration: Duration) {
        self.lock().calls.push(ControlCall::Sleep(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_procfs_layout() {
        let fake = FakeProcFs::new();
        fake.process(5).cmdline(&["java", "Main"]).fds(2).create();
        assert!(fake.root().join("5/cmdline").is_file());
        assert_eq!(std::fs::read_dir(fake.root().join("5/fd")).unwrap().count(), 2);

        fake.remove(5);
        assert!(!fake.root().join("5").exists());
    }

    #[test]
    fn test_capturing_subscriber_is_scoped() {
        let (subscriber, buffer) = capturing_subscriber();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("inside");
        });
        tracing::info!("outside");
        let out = buffer.contents();
        assert!(out.contains("inside"));
        assert!(!out.contains("outside"));
    }

    #[test]
    fn test_harness_spawn_and_drop() {
        if !ProcessHarness::is_available() {
            return;
        }
        let handle = ProcessHarness.spawn_sleep(30).unwrap();
        assert!(handle.is_running());
        let pid = handle.pid();
        drop(handle);
        assert!(!Path::new(&format!("/proc/{}", pid)).exists() || {
            // pid may already be recycled; the zombie must at least be gone
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
            !stat.contains(" Z ")
        });
    }
}
