//! Parsers for /proc filesystem files.
//!
//! Every parser takes file content and returns a typed value, so they can
//! be exercised against fixtures and fuzzed without a live process table.
//!
//! # Files Parsed
//! - `/proc/[pid]/cmdline` - NUL-separated argument vector
//! - `/proc/[pid]/environ` - NUL-separated `KEY=VALUE` entries
//! - `/proc/[pid]/status` - Name, State, Pid, PPid, Uid, Gid, Threads
//! - `/proc/[pid]/stat` - state, ppid, num_threads, starttime
//! - `/proc/[pid]/statm` - memory page counts
//! - `/proc/stat` - boot time (`btime`)
//! - `/etc/passwd` - uid to user name

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Fields of interest from /proc/[pid]/status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Command name (truncated to 15 bytes by the kernel).
    pub name: String,
    /// State letter (R, S, D, Z, T, ...).
    pub state: char,
    pub pid: u32,
    pub ppid: u32,
    /// Real user id (first of the four Uid fields).
    pub uid: u32,
    /// Real group id.
    pub gid: u32,
    pub threads: Option<u32>,
}

/// Fields of interest from /proc/[pid]/stat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatInfo {
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub num_threads: u32,
    /// Start time in clock ticks since boot (field 22).
    pub starttime: u64,
}

/// Memory statistics from /proc/[pid]/statm.
///
/// All values are in pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemStats {
    /// Total program size (virtual).
    pub size: u64,
    /// Resident set size.
    pub resident: u64,
    /// Shared pages.
    pub shared: u64,
    /// Text (code) pages.
    pub text: u64,
    /// Library pages (unused since Linux 2.6).
    pub lib: u64,
    /// Data + stack pages.
    pub data: u64,
    /// Dirty pages (unused since Linux 2.6).
    pub dt: u64,
}

fn cmdline_args(content: &[u8]) -> Vec<&[u8]> {
    if content.is_empty() {
        return Vec::new();
    }
    let trimmed = content.strip_suffix(&[0]).unwrap_or(content);
    trimmed.split(|&b| b == 0).collect()
}

/// Split a NUL-separated argument vector.
///
/// A single trailing NUL terminates the last argument; empty arguments in
/// the middle are kept because `java "" Main` is a legal launch. Non-UTF-8
/// bytes are replaced; use [`parse_cmdline_raw`] to relaunch.
pub fn parse_cmdline_content(content: &[u8]) -> Vec<String> {
    cmdline_args(content)
        .into_iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

/// [`parse_cmdline_content`] without decoding: the exact bytes the process
/// was started with.
pub fn parse_cmdline_raw(content: &[u8]) -> Vec<OsString> {
    cmdline_args(content)
        .into_iter()
        .map(|arg| OsStr::from_bytes(arg).to_os_string())
        .collect()
}

/// `KEY=VALUE` pairs split at the first `=`. Entries without `=` or with an
/// empty key are dropped.
fn environ_pairs(content: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    content.split(|&b| b == 0).filter_map(|entry| {
        let eq = entry.iter().position(|&b| b == b'=')?;
        let (key, value) = (&entry[..eq], &entry[eq + 1..]);
        (!key.is_empty()).then_some((key, value))
    })
}

/// Parse environ file content.
///
/// Later duplicates overwrite earlier ones.
pub fn parse_environ_content(content: &[u8]) -> HashMap<String, String> {
    environ_pairs(content)
        .map(|(k, v)| {
            (
                String::from_utf8_lossy(k).into_owned(),
                String::from_utf8_lossy(v).into_owned(),
            )
        })
        .collect()
}

/// [`parse_environ_content`] keeping the raw bytes of keys and values.
pub fn parse_environ_raw(content: &[u8]) -> HashMap<OsString, OsString> {
    environ_pairs(content)
        .map(|(k, v)| {
            (
                OsStr::from_bytes(k).to_os_string(),
                OsStr::from_bytes(v).to_os_string(),
            )
        })
        .collect()
}

/// Parse status file content.
///
/// `Name` and `Uid` are required; everything else defaults.
pub fn parse_status_content(content: &str) -> Option<StatusInfo> {
    let mut info = StatusInfo {
        state: '?',
        ..Default::default()
    };
    let mut has_name = false;
    let mut has_uid = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key {
            "Name" => {
                info.name = value.to_string();
                has_name = true;
            }
            "State" => {
                info.state = value.chars().next().unwrap_or('?');
            }
            "Pid" => info.pid = value.parse().unwrap_or(0),
            "PPid" => info.ppid = value.parse().unwrap_or(0),
            "Uid" => {
                // Format: "Uid:\t1000\t1000\t1000\t1000", first is real UID
                if let Some(uid) = value.split_whitespace().next().and_then(|v| v.parse().ok()) {
                    info.uid = uid;
                    has_uid = true;
                }
            }
            "Gid" => {
                info.gid = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
            }
            "Threads" => info.threads = value.parse().ok(),
            _ => {}
        }
    }

    if has_name && has_uid {
        Some(info)
    } else {
        None
    }
}

/// Parse stat file content.
///
/// The comm field is parenthesised and may itself contain spaces or `)`,
/// so fields are counted from the last `)`.
pub fn parse_stat_content(content: &str) -> Option<StatInfo> {
    let comm_start = content.find('(')?;
    let comm_end = content.rfind(')')?;
    if comm_end < comm_start {
        return None;
    }

    let comm = content[comm_start + 1..comm_end].to_string();
    let after_comm = content.get(comm_end + 1..)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();

    // fields[0] is field 3 (state); starttime is field 22.
    if fields.len() < 20 {
        return None;
    }

    Some(StatInfo {
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: fields[1].parse().unwrap_or(0),
        num_threads: fields[17].parse().unwrap_or(0),
        starttime: fields[19].parse().ok()?,
    })
}

/// Parse statm file content.
///
/// Format: "size resident shared text lib data dt"
pub fn parse_statm_content(content: &str) -> Option<MemStats> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 7 {
        return None;
    }

    Some(MemStats {
        size: parts[0].parse().ok()?,
        resident: parts[1].parse().ok()?,
        shared: parts[2].parse().ok()?,
        text: parts[3].parse().ok()?,
        lib: parts[4].parse().ok()?,
        data: parts[5].parse().ok()?,
        dt: parts[6].parse().ok()?,
    })
}

/// Extract boot time (seconds since the epoch) from /proc/stat content.
pub fn parse_boot_time_content(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
}

/// Map uids to user names from passwd-format content. The first entry for
/// a uid wins.
pub fn parse_passwd_users(content: &str) -> HashMap<u32, String> {
    let mut users = HashMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 3 {
            continue;
        }
        if let Ok(uid) = fields[2].parse::<u32>() {
            users.entry(uid).or_insert_with(|| fields[0].to_string());
        }
    }
    users
}

/// Count entries of an fd directory.
pub fn count_fd_dir(dir: &Path) -> Option<u32> {
    let entries = fs::read_dir(dir).ok()?;
    Some(entries.flatten().count() as u32)
}

/// System clock ticks per second.
#[cfg(unix)]
pub fn clk_tck() -> u64 {
    static CLK_TCK: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if tck > 0 {
            tck as u64
        } else {
            100
        }
    })
}

#[cfg(not(unix))]
pub fn clk_tck() -> u64 {
    100
}

/// System page size in bytes.
#[cfg(unix)]
pub fn page_size() -> u64 {
    static PAGE_SIZE: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as u64
        } else {
            4096
        }
    })
}

#[cfg(not(unix))]
pub fn page_size() -> u64 {
    4096
}
