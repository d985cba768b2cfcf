//! Process inspector: one `/proc/<pid>` read per call.
//!
//! Reads are independently fallible because the process table is live and a
//! process may exit between listing and reading. The argument vector and the
//! credentials are required; every other field degrades to an empty or zero
//! value and is logged at debug level.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use super::proc_parsers::{
    clk_tck, count_fd_dir, page_size, parse_boot_time_content, parse_cmdline_content,
    parse_cmdline_raw, parse_environ_content, parse_environ_raw, parse_passwd_users,
    parse_stat_content, parse_statm_content, parse_status_content, StatInfo,
};
use super::types::{LaunchContext, MemoryUsage, ProcessSnapshot, ProcessState};
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};

/// Errors reading a single process.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("permission denied reading process {0}")]
    PermissionDenied(u32),

    #[error("failed to read {field} of process {pid}: {source}")]
    Io {
        pid: u32,
        field: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("malformed {field} for process {pid}")]
    Parse { pid: u32, field: &'static str },
}

impl InspectError {
    fn from_io(pid: u32, field: &'static str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => InspectError::NotFound(pid),
            io::ErrorKind::PermissionDenied => InspectError::PermissionDenied(pid),
            _ => InspectError::Io {
                pid,
                field,
                source: err,
            },
        }
    }

    pub fn pid(&self) -> u32 {
        match self {
            InspectError::NotFound(pid) | InspectError::PermissionDenied(pid) => *pid,
            InspectError::Io { pid, .. } | InspectError::Parse { pid, .. } => *pid,
        }
    }
}

impl From<InspectError> for jr_common::Error {
    fn from(err: InspectError) -> Self {
        match err {
            InspectError::NotFound(pid) => jr_common::Error::ProcessNotFound { pid },
            InspectError::PermissionDenied(pid) => jr_common::Error::PermissionDenied { pid },
            other => jr_common::Error::ProcessUnreadable {
                pid: other.pid(),
                reason: other.to_string(),
            },
        }
    }
}

/// The process table itself could not be read.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot enumerate process table at {path}: {source}")]
    TableUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("discovery cancelled")]
    Cancelled,
}

impl From<DiscoveryError> for jr_common::Error {
    fn from(err: DiscoveryError) -> Self {
        jr_common::Error::Discovery(err.to_string())
    }
}

/// Reads process snapshots from a procfs tree.
#[derive(Debug)]
pub struct ProcInspector {
    root: PathBuf,
    passwd_path: PathBuf,
    clk_tck: u64,
    page_size: u64,
    boot_time: OnceLock<Option<u64>>,
    /// uid to name, loaded on first use and dropped by `refresh_users`.
    users: Mutex<Option<HashMap<u32, String>>>,
    log: LogContext,
}

impl ProcInspector {
    /// Inspector over the host's `/proc`.
    pub fn new(log: LogContext) -> Self {
        Self::with_root("/proc", log)
    }

    /// Inspector over an arbitrary procfs-shaped directory.
    pub fn with_root(root: impl Into<PathBuf>, log: LogContext) -> Self {
        Self {
            root: root.into(),
            passwd_path: PathBuf::from("/etc/passwd"),
            clk_tck: clk_tck(),
            page_size: page_size(),
            boot_time: OnceLock::new(),
            users: Mutex::new(None),
            log,
        }
    }

    pub fn with_passwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.passwd_path = path.into();
        self
    }

    /// Override the tick rate and page size (fixtures from other hosts).
    pub fn with_units(mut self, clk_tck: u64, page_size: u64) -> Self {
        self.clk_tck = clk_tck.max(1);
        self.page_size = page_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    fn pid_path(&self, pid: u32, file: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(file)
    }

    /// List numeric entries of the procfs root, ascending.
    pub fn list_pids(&self) -> Result<Vec<u32>, DiscoveryError> {
        let entries = fs::read_dir(&self.root).map_err(|e| DiscoveryError::TableUnreadable {
            path: self.root.display().to_string(),
            source: e,
        })?;

        let mut pids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// Read a full snapshot of one process.
    pub fn inspect(&self, pid: u32) -> Result<ProcessSnapshot, InspectError> {
        let cmdline_raw = fs::read(self.pid_path(pid, "cmdline"))
            .map_err(|e| InspectError::from_io(pid, "cmdline", e))?;
        let cmdline = parse_cmdline_content(&cmdline_raw);
        let argv = parse_cmdline_raw(&cmdline_raw);

        let status_raw = fs::read_to_string(self.pid_path(pid, "status"))
            .map_err(|e| InspectError::from_io(pid, "status", e))?;
        let status = parse_status_content(&status_raw).ok_or(InspectError::Parse {
            pid,
            field: "status",
        })?;

        let stat = self.read_stat(pid);

        let cwd = self.read_link_or_degrade(pid, "cwd").to_string_lossy().into_owned();
        let exe = self.read_link_or_degrade(pid, "exe").to_string_lossy().into_owned();

        let environ = match fs::read(self.pid_path(pid, "environ")) {
            Ok(raw) => parse_environ_content(&raw),
            Err(e) => {
                self.degraded(pid, "environ", &e.to_string());
                HashMap::new()
            }
        };

        let memory = match fs::read_to_string(self.pid_path(pid, "statm"))
            .ok()
            .and_then(|c| parse_statm_content(&c))
        {
            Some(m) => MemoryUsage {
                rss_bytes: m.resident * self.page_size,
                vms_bytes: m.size * self.page_size,
                shared_bytes: m.shared * self.page_size,
                text_bytes: m.text * self.page_size,
                data_bytes: m.data * self.page_size,
            },
            None => {
                self.degraded(pid, "statm", "unreadable or malformed");
                MemoryUsage::default()
            }
        };

        let start_time = stat.as_ref().and_then(|s| self.start_time_from_ticks(s.starttime));
        if start_time.is_none() {
            self.degraded(pid, "starttime", "stat or boot time unavailable");
        }

        let threads = status
            .threads
            .or(stat.as_ref().map(|s| s.num_threads))
            .unwrap_or(0);

        let open_fds = count_fd_dir(&self.pid_path(pid, "fd")).unwrap_or_else(|| {
            self.degraded(pid, "fd", "directory unreadable");
            0
        });

        let state_char = if status.state != '?' {
            status.state
        } else {
            stat.as_ref().map(|s| s.state).unwrap_or('?')
        };

        Ok(ProcessSnapshot {
            pid,
            ppid: status.ppid,
            name: status.name,
            state: ProcessState::from_char(state_char),
            cmdline,
            argv,
            environ,
            user: self.resolve_user(status.uid),
            uid: status.uid,
            gid: status.gid,
            cwd,
            exe,
            start_time,
            memory,
            cpu_percent: 0.0,
            threads,
            open_fds,
        })
    }

    /// Capture the working directory and environment needed to relaunch.
    ///
    /// Fails only if the process is gone; unreadable fields come back empty.
    /// Values are the raw bytes, not a UTF-8 rendering.
    pub fn capture_launch_context(&self, pid: u32) -> Result<LaunchContext, InspectError> {
        let proc_dir = self.root.join(pid.to_string());
        if !proc_dir.exists() {
            return Err(InspectError::NotFound(pid));
        }

        let cwd = self.read_link_or_degrade(pid, "cwd");
        let env = match fs::read(self.pid_path(pid, "environ")) {
            Ok(raw) => parse_environ_raw(&raw),
            Err(e) => {
                self.degraded(pid, "environ", &e.to_string());
                HashMap::new()
            }
        };

        Ok(LaunchContext { cwd, env })
    }

    /// Current kernel state of a pid, if it still has a table entry.
    pub fn state_of(&self, pid: u32) -> Option<ProcessState> {
        self.read_stat(pid).map(|s| ProcessState::from_char(s.state))
    }

    fn read_stat(&self, pid: u32) -> Option<StatInfo> {
        fs::read_to_string(self.pid_path(pid, "stat"))
            .ok()
            .and_then(|c| parse_stat_content(&c))
    }

    fn read_link_or_degrade(&self, pid: u32, field: &'static str) -> PathBuf {
        match fs::read_link(self.pid_path(pid, field)) {
            Ok(target) => target,
            Err(e) => {
                self.degraded(pid, field, &e.to_string());
                PathBuf::new()
            }
        }
    }

    fn boot_time(&self) -> Option<u64> {
        *self.boot_time.get_or_init(|| {
            fs::read_to_string(self.root.join("stat"))
                .ok()
                .and_then(|c| parse_boot_time_content(&c))
        })
    }

    /// Boot time plus ticks scaled by the host tick rate.
    fn start_time_from_ticks(&self, ticks: u64) -> Option<DateTime<Utc>> {
        let boot = self.boot_time()?;
        let secs = boot.checked_add(ticks / self.clk_tck)?;
        let nanos = (ticks % self.clk_tck) * 1_000_000_000 / self.clk_tck;
        Utc.timestamp_opt(i64::try_from(secs).ok()?, nanos as u32).single()
    }

    /// Forget the cached user table; the next lookup rereads the passwd
    /// file. Called once per discovery pass.
    pub fn refresh_users(&self) {
        *self.lock_users() = None;
    }

    fn lock_users(&self) -> std::sync::MutexGuard<'_, Option<HashMap<u32, String>>> {
        match self.users.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn resolve_user(&self, uid: u32) -> String {
        let mut users = self.lock_users();
        let table = users.get_or_insert_with(|| {
            fs::read_to_string(&self.passwd_path)
                .map(|c| parse_passwd_users(&c))
                .unwrap_or_default()
        });
        table.get(&uid).cloned().unwrap_or_else(|| uid.to_string())
    }

    fn degraded(&self, pid: u32, field: &str, reason: &str) {
        log_event!(
            self.log,
            DEBUG,
            event_names::PROCESS_FIELD_DEGRADED,
            Stage::Discover,
            format!("{} of process {} unavailable: {}", field, pid, reason),
            pid = pid,
            field = field
        );
    }
}
