//! Snapshot types produced by the process inspector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Process state from the kernel's state letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Zombie,
    Stopped,
    Idle,
    Dead,
    #[default]
    Unknown,
}

impl ProcessState {
    pub fn from_char(c: char) -> Self {
        match c {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'Z' => ProcessState::Zombie,
            'T' | 't' => ProcessState::Stopped,
            'I' => ProcessState::Idle,
            'X' | 'x' => ProcessState::Dead,
            _ => ProcessState::Unknown,
        }
    }

    /// Zombies and dead entries still occupy a pid but are not running.
    pub fn is_gone(&self) -> bool {
        matches!(self, ProcessState::Zombie | ProcessState::Dead)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Running => "R",
            ProcessState::Sleeping => "S",
            ProcessState::DiskSleep => "D",
            ProcessState::Zombie => "Z",
            ProcessState::Stopped => "T",
            ProcessState::Idle => "I",
            ProcessState::Dead => "X",
            ProcessState::Unknown => "?",
        };
        write!(f, "{}", s)
    }
}

/// Memory figures converted from statm page counts to bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub shared_bytes: u64,
    pub text_bytes: u64,
    pub data_bytes: u64,
}

/// Point-in-time read of one OS process.
///
/// Built fresh on every scan and never mutated. Pids are recycled by the
/// kernel, so a snapshot must not be trusted across scans without a fresh
/// liveness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub state: ProcessState,
    /// Ordered argument vector, decoded for display and matching.
    pub cmdline: Vec<String>,
    /// The same vector as raw bytes. Relaunches use this one.
    #[serde(skip)]
    pub argv: Vec<OsString>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub environ: HashMap<String, String>,
    /// Owning user name; the numeric uid when it cannot be resolved.
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    /// Empty when unreadable.
    pub cwd: String,
    /// Empty when unreadable.
    pub exe: String,
    pub start_time: Option<DateTime<Utc>>,
    pub memory: MemoryUsage,
    /// Always 0.0: a single read has no sampling window.
    pub cpu_percent: f64,
    pub threads: u32,
    pub open_fds: u32,
}

impl ProcessSnapshot {
    /// Time since the process started, if the start time is known.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<Duration> {
        let start = self.start_time?;
        (now - start).to_std().ok()
    }

    /// Argument vector joined with spaces for display.
    pub fn command_line(&self) -> String {
        self.cmdline.join(" ")
    }

    /// Raw argument vector to relaunch with. Falls back to the decoded one
    /// when the raw bytes were not captured (deserialized snapshots).
    pub fn launch_argv(&self) -> Vec<OsString> {
        if self.argv.len() == self.cmdline.len() {
            self.argv.clone()
        } else {
            self.cmdline.iter().map(OsString::from).collect()
        }
    }
}

/// Working directory and environment captured from a live process so that
/// its replacement can be launched the same way.
///
/// Kept as raw OS strings: a replacement must see the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchContext {
    /// Empty means inherit the launcher's directory.
    pub cwd: PathBuf,
    pub env: HashMap<OsString, OsString>,
}

/// Human-readable byte count (B, KB, MB, GB).
pub fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
