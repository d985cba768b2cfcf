//! Mock process snapshots for testing.
//!
//! Builders for `ProcessSnapshot` and `ClassifiedProcess` values so that
//! classifier, policy and coordinator tests need no live process table.
//!
//! ```ignore
//! use jr_core::mock_process::{MockSnapshotBuilder, java_jar_process};
//!
//! let snap = MockSnapshotBuilder::new(1234, "java")
//!     .cmdline(&["java", "-jar", "app.jar"])
//!     .user("alice", 1000)
//!     .build();
//!
//! let classified = java_jar_process(42, "bob", "svc.jar");
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::classify::{classify, ClassifiedProcess};
use crate::collect::{MemoryUsage, ProcessSnapshot, ProcessState};

/// Builder for mock `ProcessSnapshot` instances.
#[derive(Debug, Clone)]
pub struct MockSnapshotBuilder {
    snapshot: ProcessSnapshot,
}

impl MockSnapshotBuilder {
    pub fn new(pid: u32, name: &str) -> Self {
        Self {
            snapshot: ProcessSnapshot {
                pid,
                ppid: 1,
                name: name.to_string(),
                state: ProcessState::Sleeping,
                cmdline: vec![name.to_string()],
                argv: vec![name.into()],
                environ: HashMap::new(),
                user: "root".to_string(),
                uid: 0,
                gid: 0,
                cwd: String::new(),
                exe: String::new(),
                start_time: None,
                memory: MemoryUsage::default(),
                cpu_percent: 0.0,
                threads: 1,
                open_fds: 3,
            },
        }
    }

    pub fn cmdline(mut self, args: &[&str]) -> Self {
        self.snapshot.cmdline = args.iter().map(|s| s.to_string()).collect();
        self.snapshot.argv = args.iter().map(|s| s.into()).collect();
        self
    }

    pub fn user(mut self, name: &str, uid: u32) -> Self {
        self.snapshot.user = name.to_string();
        self.snapshot.uid = uid;
        self.snapshot.gid = uid;
        self
    }

    pub fn exe(mut self, path: &str) -> Self {
        self.snapshot.exe = path.to_string();
        self
    }

    pub fn cwd(mut self, path: &str) -> Self {
        self.snapshot.cwd = path.to_string();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.snapshot
            .environ
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn start_time(mut self, at: DateTime<Utc>) -> Self {
        self.snapshot.start_time = Some(at);
        self
    }

    pub fn state(mut self, state: ProcessState) -> Self {
        self.snapshot.state = state;
        self
    }

    pub fn rss_bytes(mut self, bytes: u64) -> Self {
        self.snapshot.memory.rss_bytes = bytes;
        self
    }

    pub fn build(self) -> ProcessSnapshot {
        self.snapshot
    }

    /// Build and run the classifier over the result.
    pub fn classified(self) -> ClassifiedProcess {
        classify(self.snapshot)
    }
}

// ============================================================================
// Factory functions
// ============================================================================

/// A `java -jar <jar>` process owned by `user`.
pub fn java_jar_process(pid: u32, user: &str, jar: &str) -> ClassifiedProcess {
    MockSnapshotBuilder::new(pid, "java")
        .cmdline(&["java", "-Xmx512m", "-jar", jar])
        .exe("/usr/lib/jvm/bin/java")
        .user(user, uid_for(user))
        .cwd("/srv")
        .classified()
}

/// A `java <main-class>` process already carrying the given agent flags.
pub fn java_main_class_process(
    pid: u32,
    user: &str,
    main_class: &str,
    agent_flags: &[&str],
) -> ClassifiedProcess {
    let mut args: Vec<&str> = vec!["/usr/bin/java"];
    args.extend_from_slice(agent_flags);
    args.push("-Dapp.home=/srv");
    args.push(main_class);
    MockSnapshotBuilder::new(pid, "java")
        .cmdline(&args)
        .exe("/usr/bin/java")
        .user(user, uid_for(user))
        .classified()
}

/// A non-Java process.
pub fn native_process(pid: u32, name: &str) -> ClassifiedProcess {
    MockSnapshotBuilder::new(pid, name)
        .cmdline(&[&format!("/usr/sbin/{}", name), "--foreground"])
        .exe(&format!("/usr/sbin/{}", name))
        .classified()
}

/// Stable uid per user name so fixtures stay deterministic.
fn uid_for(user: &str) -> u32 {
    match user {
        "root" => 0,
        "alice" => 1000,
        "bob" => 1001,
        other => 2000 + other.bytes().map(u32::from).sum::<u32>(),
    }
}
