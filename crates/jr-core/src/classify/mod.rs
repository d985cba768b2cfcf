//! Process classifier.
//!
//! Pure functions over a snapshot's executable path and argument vector:
//! - Java verdict (heuristic, see [`is_java_process`])
//! - agent flags already present
//! - main class or jar inference
//!
//! The heuristics are intentionally simple and will misfire on unusual
//! launch styles (module-path launches, wrapper scripts whose path contains
//! the runtime token). They are kept here, isolated from call sites, so that
//! their imprecision is testable in one place.

mod agent;

pub use agent::{
    extract_agents, normalize_path, parse_agent_param, AgentDescriptor, AGENT_FLAG_PREFIXES,
};

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::Path;

use crate::collect::ProcessSnapshot;

/// Token identifying the Java runtime.
pub const RUNTIME_TOKEN: &str = "java";

/// Extension of a Java archive.
pub const JAR_EXTENSION: &str = ".jar";

/// A snapshot plus the classifier's verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedProcess {
    #[serde(flatten)]
    pub snapshot: ProcessSnapshot,
    pub is_java: bool,
    pub agents: Vec<AgentDescriptor>,
    /// Set only when no jar was found.
    pub main_class: Option<String>,
    pub jar_file: Option<String>,
}

impl ClassifiedProcess {
    pub fn pid(&self) -> u32 {
        self.snapshot.pid
    }

    pub fn has_agents(&self) -> bool {
        !self.agents.is_empty()
    }

    /// The jar if present, otherwise the main class.
    pub fn entry_point(&self) -> Option<&str> {
        self.jar_file.as_deref().or(self.main_class.as_deref())
    }

    /// True if an agent with the same normalized path is already attached.
    pub fn has_agent(&self, agent: &AgentDescriptor) -> bool {
        self.agents.iter().any(|a| a.same_agent(agent))
    }
}

/// Inferred entry point of a JVM launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPoint {
    pub main_class: Option<String>,
    pub jar_file: Option<String>,
}

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

/// Java verdict: the executable's base name is the runtime token, or any
/// argument contains the token, or any argument ends with the jar extension.
pub fn is_java_process(exe: &str, argv: &[String]) -> bool {
    if !exe.is_empty() && base_name(exe) == RUNTIME_TOKEN {
        return true;
    }
    argv.iter()
        .any(|arg| arg.contains(RUNTIME_TOKEN) || arg.ends_with(JAR_EXTENSION))
}

/// Index of the first argument whose base name contains the runtime token.
///
/// Works on decoded and raw argument vectors alike.
pub fn launcher_index<A: AsRef<OsStr>>(argv: &[A]) -> Option<usize> {
    argv.iter().position(|arg| {
        let path = Path::new(arg.as_ref());
        path.file_name()
            .unwrap_or(path.as_os_str())
            .to_string_lossy()
            .contains(RUNTIME_TOKEN)
    })
}

/// Best-effort main class / jar inference.
///
/// Only arguments after the launcher are considered (all of them when no
/// launcher is found). The first non-flag argument ending in `.jar` is the
/// jar. The first argument that neither starts with `-` nor contains `=` is
/// the main-class candidate, dropped when a jar was found.
pub fn infer_entry_point(argv: &[String]) -> EntryPoint {
    let start = launcher_index(argv).map(|i| i + 1).unwrap_or(0);
    let rest = argv.get(start..).unwrap_or(&[]);

    let jar_file = rest
        .iter()
        .find(|arg| !arg.starts_with('-') && arg.ends_with(JAR_EXTENSION))
        .cloned();

    let main_class = if jar_file.is_some() {
        None
    } else {
        rest.iter()
            .find(|arg| !arg.starts_with('-') && !arg.contains('='))
            .cloned()
    };

    EntryPoint {
        main_class,
        jar_file,
    }
}

/// Run every classifier over a snapshot.
pub fn classify(snapshot: ProcessSnapshot) -> ClassifiedProcess {
    let is_java = is_java_process(&snapshot.exe, &snapshot.cmdline);
    let agents = extract_agents(&snapshot.cmdline);
    let entry = infer_entry_point(&snapshot.cmdline);

    ClassifiedProcess {
        snapshot,
        is_java,
        agents,
        main_class: entry.main_class,
        jar_file: entry.jar_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_process::MockSnapshotBuilder;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_java_by_exe_name() {
        assert!(is_java_process("/usr/lib/jvm/bin/java", &argv(&["server"])));
        assert!(!is_java_process("/usr/lib/jvm/bin/javac-wrapper", &argv(&["x"])));
    }

    #[test]
    fn test_java_by_argument() {
        assert!(is_java_process("", &argv(&["/opt/jdk/bin/java", "Main"])));
        assert!(is_java_process("/bin/sh", &argv(&["run", "app.jar"])));
        assert!(!is_java_process("/usr/sbin/nginx", &argv(&["nginx", "-g", "daemon off;"])));
    }

    #[test]
    fn test_java_heuristic_false_positive_is_accepted() {
        // A shell script whose path mentions the runtime is classified Java.
        assert!(is_java_process("/bin/bash", &argv(&["bash", "/opt/java-tools/cleanup.sh"])));
    }

    #[test]
    fn test_launcher_index() {
        assert_eq!(launcher_index(&argv(&["/usr/bin/java", "-jar", "a.jar"])), Some(0));
        assert_eq!(
            launcher_index(&argv(&["/usr/bin/env", "java", "Main"])),
            Some(1)
        );
        assert_eq!(launcher_index(&argv(&["./run", "app.jar"])), None);
    }

    #[test]
    fn test_infer_jar_wins() {
        let entry = infer_entry_point(&argv(&[
            "java",
            "-javaagent:/opt/a.jar",
            "-Dx=y",
            "-jar",
            "/srv/app.jar",
            "--port",
            "8080",
        ]));
        assert_eq!(entry.jar_file.as_deref(), Some("/srv/app.jar"));
        assert_eq!(entry.main_class, None);
    }

    #[test]
    fn test_infer_main_class() {
        let entry = infer_entry_point(&argv(&[
            "/usr/bin/java",
            "-Xmx1g",
            "-Dspring.profiles.active=prod",
            "com.acme.Main",
            "arg1",
        ]));
        assert_eq!(entry.main_class.as_deref(), Some("com.acme.Main"));
        assert_eq!(entry.jar_file, None);
    }

    #[test]
    fn test_infer_without_launcher_scans_all() {
        let entry = infer_entry_point(&argv(&["./run.sh", "conf=1"]));
        assert_eq!(entry.main_class.as_deref(), Some("./run.sh"));
        assert_eq!(infer_entry_point(&[]), EntryPoint::default());
    }

    #[test]
    fn test_infer_classpath_value_taken_as_main_class() {
        // Option values are not recognized: the classpath after `-cp` is the
        // first bare token, so it wins over the real main class.
        let entry = infer_entry_point(&argv(&["java", "-cp", "lib", "com.Main"]));
        assert_eq!(entry.main_class.as_deref(), Some("lib"));

        // A jar inside a flag token is not the entry point.
        let entry = infer_entry_point(&argv(&["java", "-Xbootclasspath/a:boot.jar", "Main"]));
        assert_eq!(entry.jar_file, None);
        assert_eq!(entry.main_class.as_deref(), Some("Main"));

        // Tokens before the launcher are never entry points.
        let entry = infer_entry_point(&argv(&["env", "Wrapper", "java", "-Xmx1g"]));
        assert_eq!(entry, EntryPoint::default());
    }

    #[test]
    fn test_launcher_index_on_raw_argv() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let raw = vec![
            OsString::from_vec(b"/opt/\xff/bin/java".to_vec()),
            OsString::from("Main"),
        ];
        assert_eq!(launcher_index(&raw), Some(0));
    }

    #[test]
    fn test_classify_populates_everything() {
        let snap = MockSnapshotBuilder::new(10, "java")
            .exe("/usr/bin/java")
            .cmdline(&[
                "/usr/bin/java",
                "-javaagent:/a/b/../c/agent.jar=mode=fast",
                "-jar",
                "svc.jar",
            ])
            .build();
        let c = classify(snap);
        assert!(c.is_java);
        assert_eq!(c.agents.len(), 1);
        assert_eq!(c.agents[0].options.as_deref(), Some("mode=fast"));
        assert_eq!(c.entry_point(), Some("svc.jar"));
        assert!(c.has_agent(&AgentDescriptor::new("/a/c/agent.jar")));
        assert!(!c.has_agent(&AgentDescriptor::new("/a/b/agent.jar")));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let snap = MockSnapshotBuilder::new(11, "java")
            .cmdline(&["java", "-javaagent:/x.jar", "Main"])
            .build();
        assert_eq!(classify(snap.clone()), classify(snap));
    }
}
