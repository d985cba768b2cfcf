//! Configuration snapshots for audit logging.
//!
//! Captures where the active configuration came from and a hash of its
//! effective values, so that every run can be tied to the exact settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resolve::compute_sha256;
use super::{Config, ConfigSource};
use crate::error::Result;

/// Configuration snapshot recorded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub snapshot_at: DateTime<Utc>,

    /// Path to the file (None if defaults)
    pub path: Option<String>,

    /// SHA-256 of the file content (None if defaults)
    pub file_hash: Option<String>,

    /// SHA-256 of the effective config serialized as JSON
    pub effective_hash: String,

    pub resolution: String,

    pub agents_enabled: usize,
    pub exclude_rules: usize,
}

impl ConfigSnapshot {
    pub fn new(config: &Config, source: &ConfigSource) -> Result<Self> {
        let effective = serde_json::to_string(config)?;

        Ok(ConfigSnapshot {
            snapshot_at: Utc::now(),
            path: source.path.clone(),
            file_hash: source.hash.clone(),
            effective_hash: compute_sha256(&effective),
            resolution: source.resolution.to_string(),
            agents_enabled: config.enabled_agents().len(),
            exclude_rules: config.exclude.len(),
        })
    }

    /// Return true if no config file was read.
    pub fn is_default(&self) -> bool {
        self.resolution == "default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    #[test]
    fn test_snapshot_from_defaults() {
        let snapshot = ConfigSnapshot::new(&Config::default(), &ConfigSource::defaults()).unwrap();
        assert!(snapshot.is_default());
        assert!(snapshot.path.is_none());
        assert_eq!(snapshot.effective_hash.len(), 64);
        assert_eq!(snapshot.agents_enabled, 0);
    }

    #[test]
    fn test_effective_hash_tracks_content() {
        let base = ConfigSnapshot::new(&Config::default(), &ConfigSource::defaults()).unwrap();

        let mut config = Config::default();
        config.agents.push(AgentConfig {
            name: "a".into(),
            path: "/a.jar".into(),
            options: None,
            enabled: true,
            priority: 0,
        });
        let changed = ConfigSnapshot::new(&config, &ConfigSource::defaults()).unwrap();

        assert_ne!(base.effective_hash, changed.effective_hash);
        assert_eq!(changed.agents_enabled, 1);
    }
}
