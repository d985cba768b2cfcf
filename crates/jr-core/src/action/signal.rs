//! Signal delivery and exit waiting.
//!
//! - `kill(2)` wrappers with errno mapped to typed errors
//! - zero-signal liveness probe
//! - exit wait raced against a timeout on a watcher thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Signals the orchestrator sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful termination (SIGTERM).
    Terminate,
    /// Forceful kill (SIGKILL).
    Kill,
}

impl Signal {
    pub fn as_raw(self) -> i32 {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("not permitted to signal process {0}")]
    PermissionDenied(u32),

    #[error("failed to signal process {pid}: {source}")]
    Failed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

fn to_raw_pid(pid: u32) -> Result<i32, SignalError> {
    // 0 and negative values address process groups.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(raw),
        _ => Err(SignalError::NotFound(pid)),
    }
}

/// Send a signal to a single process.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), SignalError> {
    let raw = to_raw_pid(pid)?;
    let result = unsafe { libc::kill(raw, signal.as_raw()) };
    if result == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Err(SignalError::NotFound(pid)),
        Some(libc::EPERM) => Err(SignalError::PermissionDenied(pid)),
        _ => Err(SignalError::Failed { pid, source: err }),
    }
}

/// Zero-signal probe. EPERM still means the process exists.
pub fn process_exists(pid: u32) -> bool {
    let Ok(raw) = to_raw_pid(pid) else {
        return false;
    };
    if unsafe { libc::kill(raw, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Wait until `is_alive` reports false or `timeout` elapses.
///
/// A watcher thread polls and reports the exit over a channel; the caller
/// blocks on `recv_timeout`. Whichever happens first wins. On timeout the
/// watcher is told to stop and a late exit report is dropped with the
/// channel. Returns true if the exit was observed in time.
pub fn wait_for_exit<F>(pid: u32, timeout: Duration, poll: Duration, is_alive: F) -> bool
where
    F: Fn(u32) -> bool + Send + 'static,
{
    if !is_alive(pid) {
        return true;
    }

    let (tx, rx) = mpsc::channel();
    let abandoned = Arc::new(AtomicBool::new(false));
    let watcher_abandoned = Arc::clone(&abandoned);

    let spawned = thread::Builder::new()
        .name(format!("jr-exit-watch-{}", pid))
        .spawn(move || {
            while !watcher_abandoned.load(Ordering::Relaxed) {
                if !is_alive(pid) {
                    let _ = tx.send(());
                    return;
                }
                thread::sleep(poll);
            }
        });

    if spawned.is_err() {
        // No watcher thread: a single sleep-then-check is the best we can do.
        thread::sleep(timeout);
        return false;
    }

    let exited = rx.recv_timeout(timeout).is_ok();
    abandoned.store(true, Ordering::Relaxed);
    exited
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[test]
    fn test_self_exists() {
        assert!(process_exists(std::process::id()));
    }

    #[test]
    fn test_invalid_pids() {
        assert!(!process_exists(0));
        assert!(!process_exists(u32::MAX));
        assert!(matches!(
            send_signal(0, Signal::Terminate),
            Err(SignalError::NotFound(0))
        ));
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
        assert_eq!(Signal::Kill.as_raw(), libc::SIGKILL);
    }

    #[test]
    fn test_wait_observes_exit() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&polls);
        // Alive for the first three probes.
        let exited = wait_for_exit(1, Duration::from_secs(5), Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst) < 3
        });
        assert!(exited);
        assert!(polls.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn test_wait_times_out() {
        let start = Instant::now();
        let exited = wait_for_exit(1, Duration::from_millis(60), Duration::from_millis(5), |_| true);
        assert!(!exited);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_already_gone_returns_immediately() {
        assert!(wait_for_exit(1, Duration::from_secs(60), Duration::from_secs(1), |_| false));
    }
}
