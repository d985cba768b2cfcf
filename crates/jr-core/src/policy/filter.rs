use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use jr_common::config::ProcessSettings;

use super::{compile_patterns, pattern_hit};
use crate::classify::ClassifiedProcess;
use crate::logging::LogContext;

/// Inclusion predicates. Every non-empty predicate must hold; an empty list
/// or `None` means no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessFilter {
    pub pids: Vec<u32>,
    /// Exact process names.
    pub names: Vec<String>,
    pub users: Vec<String>,
    /// Regexes against name, jar and main class; one hit is enough.
    pub patterns: Vec<String>,
    /// `Some(true)`: at least one agent; `Some(false)`: none.
    pub has_agent: Option<bool>,
    pub min_uptime: Option<Duration>,
}

impl ProcessFilter {
    pub fn by_pids(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            pids: pids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self == &ProcessFilter::default()
    }
}

/// The `process` section of the config file as a base filter.
impl From<&ProcessSettings> for ProcessFilter {
    fn from(settings: &ProcessSettings) -> Self {
        Self {
            users: settings.user_filter.clone(),
            patterns: settings.include_patterns.clone(),
            min_uptime: settings.min_uptime_secs.map(Duration::from_secs),
            ..Default::default()
        }
    }
}

/// A [`ProcessFilter`] with its patterns compiled.
#[derive(Debug, Clone)]
pub struct FilterSet {
    filter: ProcessFilter,
    patterns: Vec<Regex>,
}

impl FilterSet {
    pub fn new(filter: ProcessFilter, log: &LogContext) -> Self {
        let patterns = compile_patterns(&filter.patterns, "filter", log);
        Self { filter, patterns }
    }

    pub fn filter(&self) -> &ProcessFilter {
        &self.filter
    }

    pub fn matches(&self, process: &ClassifiedProcess) -> bool {
        self.matches_at(process, Utc::now())
    }

    /// Match with an explicit clock for the uptime predicate.
    pub fn matches_at(&self, process: &ClassifiedProcess, now: DateTime<Utc>) -> bool {
        let f = &self.filter;
        let snap = &process.snapshot;

        if !f.pids.is_empty() && !f.pids.contains(&snap.pid) {
            return false;
        }
        if !f.names.is_empty() && !f.names.iter().any(|n| n == &snap.name) {
            return false;
        }
        if !f.users.is_empty() && !f.users.iter().any(|u| u == &snap.user) {
            return false;
        }
        if let Some(want) = f.has_agent {
            if process.has_agents() != want {
                return false;
            }
        }
        // Patterns were requested; if all of them failed to compile nothing can hit.
        if !f.patterns.is_empty() && !self.patterns.iter().any(|re| pattern_hit(re, process)) {
            return false;
        }
        if let Some(min) = f.min_uptime {
            // Unknown age never satisfies a minimum.
            match snap.uptime(now) {
                Some(up) if up >= min => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_process::{java_jar_process, java_main_class_process, MockSnapshotBuilder};
    use crate::test_utils::{capturing_subscriber, test_log_context};
    use chrono::TimeZone;

    fn set(filter: ProcessFilter) -> FilterSet {
        FilterSet::new(filter, &test_log_context())
    }

    #[test]
    fn test_from_process_settings() {
        let settings = ProcessSettings {
            include_patterns: vec!["billing".into()],
            user_filter: vec!["alice".into()],
            min_uptime_secs: Some(120),
            ..Default::default()
        };
        let filter = ProcessFilter::from(&settings);
        assert_eq!(filter.users, vec!["alice"]);
        assert_eq!(filter.patterns, vec!["billing"]);
        assert_eq!(filter.min_uptime, Some(Duration::from_secs(120)));
        assert!(filter.pids.is_empty());
        assert!(ProcessFilter::from(&ProcessSettings::default()).is_unconstrained());
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let f = set(ProcessFilter::default());
        assert!(f.filter().is_unconstrained());
        assert!(f.matches(&java_jar_process(1, "alice", "a.jar")));
    }

    #[test]
    fn test_user_filter_selects_owner() {
        let procs = vec![
            java_jar_process(1, "alice", "a.jar"),
            java_jar_process(2, "bob", "b.jar"),
            java_jar_process(3, "alice", "c.jar"),
        ];
        let f = set(ProcessFilter {
            users: vec!["alice".into()],
            ..Default::default()
        });
        let pids: Vec<u32> = procs.iter().filter(|p| f.matches(p)).map(|p| p.pid()).collect();
        assert_eq!(pids, vec![1, 3]);
    }

    #[test]
    fn test_predicates_are_conjunctive() {
        let p = java_jar_process(7, "alice", "orders.jar");
        assert!(set(ProcessFilter {
            pids: vec![7],
            users: vec!["alice".into()],
            names: vec!["java".into()],
            ..Default::default()
        })
        .matches(&p));
        assert!(!set(ProcessFilter {
            pids: vec![7],
            users: vec!["bob".into()],
            ..Default::default()
        })
        .matches(&p));
        assert!(!set(ProcessFilter::by_pids([8])).matches(&p));
    }

    #[test]
    fn test_has_agent_tri_state() {
        let with = java_main_class_process(1, "alice", "Main", &["-javaagent:/a.jar"]);
        let without = java_jar_process(2, "alice", "a.jar");

        let want = set(ProcessFilter {
            has_agent: Some(true),
            ..Default::default()
        });
        let avoid = set(ProcessFilter {
            has_agent: Some(false),
            ..Default::default()
        });
        assert!(want.matches(&with) && !want.matches(&without));
        assert!(!avoid.matches(&with) && avoid.matches(&without));
    }

    #[test]
    fn test_patterns_hit_jar_or_main_class() {
        let jar = java_jar_process(1, "alice", "/srv/orders-service.jar");
        let main = java_main_class_process(2, "alice", "com.acme.billing.Main", &[]);
        let f = set(ProcessFilter {
            patterns: vec!["orders".into(), "billing".into()],
            ..Default::default()
        });
        assert!(f.matches(&jar));
        assert!(f.matches(&main));
        assert!(!f.matches(&java_jar_process(3, "alice", "inventory.jar")));
    }

    #[test]
    fn test_invalid_pattern_is_skipped_and_logged() {
        let (subscriber, buffer) = capturing_subscriber();
        let f = tracing::subscriber::with_default(subscriber, || {
            set(ProcessFilter {
                patterns: vec!["([".into(), "orders".into()],
                ..Default::default()
            })
        });
        assert!(f.matches(&java_jar_process(1, "alice", "orders.jar")));
        let logs = buffer.contents();
        assert!(logs.contains("filter.pattern_invalid"));
        assert!(logs.contains("run-test"));
    }

    #[test]
    fn test_only_invalid_patterns_match_nothing() {
        let f = set(ProcessFilter {
            patterns: vec!["([".into()],
            ..Default::default()
        });
        assert!(!f.matches(&java_jar_process(1, "alice", "orders.jar")));
    }

    #[test]
    fn test_min_uptime() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let now = start + chrono::Duration::seconds(120);
        let p = MockSnapshotBuilder::new(1, "java")
            .cmdline(&["java", "Main"])
            .start_time(start)
            .classified();
        let unknown = MockSnapshotBuilder::new(2, "java").classified();

        let f = set(ProcessFilter {
            min_uptime: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        assert!(f.matches_at(&p, now));
        assert!(!f.matches_at(&p, start + chrono::Duration::seconds(30)));
        assert!(!f.matches_at(&unknown, now));
    }
}
