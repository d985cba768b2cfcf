//! Agent flag parsing and path normalization.

use serde::{Deserialize, Serialize};

use jr_common::config::AgentConfig;

/// Flag prefixes a JVM accepts for a startup agent.
pub const AGENT_FLAG_PREFIXES: [&str; 2] = ["-javaagent:", "-javaagent="];

/// An instrumentation agent: artifact path plus optional options string.
///
/// Two descriptors refer to the same agent when their normalized paths are
/// equal; options are ignored for that purpose (see [`AgentDescriptor::same_agent`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub options: Option<String>,
    /// Verbatim flag this descriptor was parsed from, when read from a process.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub raw: Option<String>,
}

impl AgentDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            options: None,
            raw: None,
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        let options = options.into();
        self.options = if options.is_empty() {
            None
        } else {
            Some(options)
        };
        self
    }

    pub fn normalized_path(&self) -> String {
        normalize_path(&self.path)
    }

    /// Same artifact, regardless of options.
    pub fn same_agent(&self, other: &AgentDescriptor) -> bool {
        self.normalized_path() == other.normalized_path()
    }
}

impl std::fmt::Display for AgentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.options {
            Some(opts) => write!(f, "{}={}", self.path, opts),
            None => write!(f, "{}", self.path),
        }
    }
}

impl From<&AgentConfig> for AgentDescriptor {
    fn from(cfg: &AgentConfig) -> Self {
        let desc = AgentDescriptor::new(cfg.path.clone());
        match cfg.options.as_deref() {
            Some(opts) => desc.with_options(opts),
            None => desc,
        }
    }
}

/// Parse a single agent flag into a descriptor.
///
/// The remainder after the prefix is split at the first `=`: the left side
/// is the path, the right side (possibly empty) the options. Returns `None`
/// for tokens without a recognized prefix.
pub fn parse_agent_param(arg: &str) -> Option<AgentDescriptor> {
    let rest = AGENT_FLAG_PREFIXES
        .iter()
        .find_map(|prefix| arg.strip_prefix(prefix))?;

    let (path, options) = match rest.split_once('=') {
        Some((path, opts)) => (path, Some(opts.to_string())),
        None => (rest, None),
    };

    Some(AgentDescriptor {
        path: path.to_string(),
        options,
        raw: Some(arg.to_string()),
    })
}

/// Every agent flag in the argument vector, in argument order, duplicates kept.
pub fn extract_agents(argv: &[String]) -> Vec<AgentDescriptor> {
    argv.iter().filter_map(|arg| parse_agent_param(arg)).collect()
}

/// Lexically clean a path: collapse separators, drop `.` segments and
/// resolve `..` against preceding segments. The filesystem is not consulted.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // `/..` is `/`
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_colon_form() {
        let a = parse_agent_param("-javaagent:/opt/agent.jar").unwrap();
        assert_eq!(a.path, "/opt/agent.jar");
        assert_eq!(a.options, None);
        assert_eq!(a.raw.as_deref(), Some("-javaagent:/opt/agent.jar"));
    }

    #[test]
    fn test_parse_equals_form_with_options() {
        let a = parse_agent_param("-javaagent=/opt/a.jar=k=v,x=y").unwrap();
        assert_eq!(a.path, "/opt/a.jar");
        // Split happens at the first '=' only.
        assert_eq!(a.options.as_deref(), Some("k=v,x=y"));
    }

    #[test]
    fn test_parse_trailing_equals_gives_empty_options() {
        let a = parse_agent_param("-javaagent:/a.jar=").unwrap();
        assert_eq!(a.path, "/a.jar");
        assert_eq!(a.options.as_deref(), Some(""));
    }

    #[test]
    fn test_parse_rejects_other_tokens() {
        assert!(parse_agent_param("-agentlib:jdwp=transport=dt_socket").is_none());
        assert!(parse_agent_param("-Xmx1g").is_none());
        assert!(parse_agent_param("javaagent:/a.jar").is_none());
    }

    #[test]
    fn test_extract_agents_keeps_order_and_duplicates() {
        let args = argv(&[
            "java",
            "-javaagent:/b.jar",
            "-Xms1g",
            "-javaagent=/a.jar=opt",
            "-javaagent:/b.jar",
            "Main",
        ]);
        let agents = extract_agents(&args);
        let paths: Vec<&str> = agents.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["/b.jar", "/a.jar", "/b.jar"]);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b/../c/agent.jar"), "/a/c/agent.jar");
        assert_eq!(normalize_path("/a//b/./c/"), "/a/b/c");
        assert_eq!(normalize_path("/../x"), "/x");
        assert_eq!(normalize_path("a/../../b"), "../b");
        assert_eq!(normalize_path("./"), ".");
        assert_eq!(normalize_path(""), ".");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_same_agent_ignores_options() {
        let recorded = AgentDescriptor::new("/a/b/../c/agent.jar").with_options("x=1");
        let target = AgentDescriptor::new("/a/c/agent.jar");
        assert!(recorded.same_agent(&target));
        assert!(!target.same_agent(&AgentDescriptor::new("/a/c/other.jar")));
    }

    #[test]
    fn test_from_agent_config() {
        let cfg = AgentConfig {
            name: "iast".into(),
            path: "/opt/iast.jar".into(),
            options: Some(String::new()),
            enabled: true,
            priority: 0,
        };
        let desc = AgentDescriptor::from(&cfg);
        assert_eq!(desc.path, "/opt/iast.jar");
        assert_eq!(desc.options, None);
        assert_eq!(desc.to_string(), "/opt/iast.jar");
    }
}
