//! Filter and policy engine.
//!
//! - [`FilterSet`]: conjunctive inclusion predicates
//! - [`ExclusionSet`]: configuration-owned vetoes
//! - [`needs_injection`]: the final "does this process still need work" gate
//!
//! Invalid regexes never fail a match: they are logged once, when the set is
//! compiled, and skipped.

mod exclude;
mod filter;

pub use exclude::{ExclusionRule, ExclusionSet};
pub use filter::{FilterSet, ProcessFilter};

use regex::Regex;

use crate::classify::{AgentDescriptor, ClassifiedProcess};
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};

/// Target agents the process does not carry yet, in target order.
pub fn missing_agents(
    process: &ClassifiedProcess,
    targets: &[AgentDescriptor],
) -> Vec<AgentDescriptor> {
    targets
        .iter()
        .filter(|t| !process.has_agent(t))
        .cloned()
        .collect()
}

/// False if any exclusion rule matches; otherwise true if at least one
/// target agent is missing (by normalized path).
pub fn needs_injection(
    process: &ClassifiedProcess,
    targets: &[AgentDescriptor],
    exclusions: &ExclusionSet,
) -> bool {
    if exclusions.is_excluded(process) {
        return false;
    }
    targets.iter().any(|t| !process.has_agent(t))
}

/// Compile patterns, logging and dropping the ones that do not parse.
pub(crate) fn compile_patterns(patterns: &[String], source: &str, log: &LogContext) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                log_event!(
                    log,
                    WARN,
                    event_names::FILTER_PATTERN_INVALID,
                    Stage::Filter,
                    format!("skipping invalid pattern {:?} in {}: {}", pattern, source, e),
                    pattern = pattern.as_str(),
                    origin = source
                );
                None
            }
        })
        .collect()
}

/// Name, jar and main class are the pattern targets; absent values match as "".
pub(crate) fn pattern_hit(re: &Regex, process: &ClassifiedProcess) -> bool {
    re.is_match(&process.snapshot.name)
        || re.is_match(process.jar_file.as_deref().unwrap_or(""))
        || re.is_match(process.main_class.as_deref().unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_process::{java_jar_process, java_main_class_process};
    use crate::test_utils::test_log_context;

    #[test]
    fn test_needs_injection_when_agent_missing() {
        let p = java_jar_process(1, "alice", "app.jar");
        let targets = vec![AgentDescriptor::new("/opt/agent.jar")];
        assert!(needs_injection(&p, &targets, &ExclusionSet::empty()));
    }

    #[test]
    fn test_needs_injection_uses_normalized_paths() {
        let p = java_main_class_process(2, "alice", "Main", &["-javaagent:/a/b/../c/agent.jar"]);
        let targets = vec![AgentDescriptor::new("/a/c/agent.jar")];
        assert!(!needs_injection(&p, &targets, &ExclusionSet::empty()));

        let two = vec![
            AgentDescriptor::new("/a/c/agent.jar"),
            AgentDescriptor::new("/opt/apm.jar"),
        ];
        assert!(needs_injection(&p, &two, &ExclusionSet::empty()));
        let missing = missing_agents(&p, &two);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].path, "/opt/apm.jar");
    }

    #[test]
    fn test_excluded_never_needs_injection() {
        let p = java_jar_process(3, "root", "ops.jar");
        let rules = vec![ExclusionRule {
            name: "no-root".into(),
            users: vec!["root".into()],
            ..Default::default()
        }];
        let set = ExclusionSet::new(&rules, &test_log_context());
        let targets = vec![AgentDescriptor::new("/opt/agent.jar")];
        assert!(!needs_injection(&p, &targets, &set));
    }

    #[test]
    fn test_no_targets_means_nothing_to_do() {
        let p = java_jar_process(4, "alice", "app.jar");
        assert!(!needs_injection(&p, &[], &ExclusionSet::empty()));
    }
}
