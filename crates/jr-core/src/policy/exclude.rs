use regex::Regex;
use serde::{Deserialize, Serialize};

use jr_common::config::ExcludeRuleConfig;

use super::{compile_patterns, pattern_hit};
use crate::classify::ClassifiedProcess;
use crate::logging::LogContext;

/// A veto: a process matching any pid, user or pattern is left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionRule {
    pub name: String,
    pub pids: Vec<u32>,
    pub users: Vec<String>,
    pub patterns: Vec<String>,
}

impl From<&ExcludeRuleConfig> for ExclusionRule {
    fn from(cfg: &ExcludeRuleConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            pids: cfg.pids.clone(),
            users: cfg.users.clone(),
            patterns: cfg.patterns.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: ExclusionRule,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    fn matches(&self, process: &ClassifiedProcess) -> bool {
        let snap = &process.snapshot;
        self.rule.pids.contains(&snap.pid)
            || self.rule.users.iter().any(|u| u == &snap.user)
            || self.patterns.iter().any(|re| pattern_hit(re, process))
    }
}

/// All exclusion rules, compiled.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    rules: Vec<CompiledRule>,
}

impl ExclusionSet {
    pub fn new(rules: &[ExclusionRule], log: &LogContext) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let source = format!("exclude rule {:?}", rule.name);
                CompiledRule {
                    patterns: compile_patterns(&rule.patterns, &source, log),
                    rule: rule.clone(),
                }
            })
            .collect();
        Self { rules }
    }

    pub fn from_config(rules: &[ExcludeRuleConfig], log: &LogContext) -> Self {
        let rules: Vec<ExclusionRule> = rules.iter().map(ExclusionRule::from).collect();
        Self::new(&rules, log)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_excluded(&self, process: &ClassifiedProcess) -> bool {
        self.matching_rule(process).is_some()
    }

    /// Name of the first rule that vetoes the process.
    pub fn matching_rule(&self, process: &ClassifiedProcess) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.matches(process))
            .map(|r| r.rule.name.as_str())
    }
}
