//! Configuration resolution for jretrofit.
//!
//! Implements deterministic config resolution order:
//! 1. Explicit CLI flag (`--config`)
//! 2. `JR_CONFIG` environment variable
//! 3. `./jretrofit.yaml` in the working directory
//! 4. XDG config (`~/.config/jretrofit/config.yaml`)
//! 5. System config (`/etc/jretrofit/config.yaml`)
//! 6. Built-in defaults

use std::env;
use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use super::{Config, ConfigFormat};
use crate::error::{Error, Result};

/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_PATH: &str = "JR_CONFIG";

const APP_NAME: &str = "jretrofit";
const CONFIG_FILENAME: &str = "config.yaml";
const LOCAL_FILENAME: &str = "jretrofit.yaml";

/// How the config file was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResolution {
    CliFlag,
    EnvVar,
    WorkingDir,
    XdgConfig,
    SystemConfig,
    Default,
}

impl std::fmt::Display for ConfigResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigResolution::CliFlag => write!(f, "cli"),
            ConfigResolution::EnvVar => write!(f, "env"),
            ConfigResolution::WorkingDir => write!(f, "cwd"),
            ConfigResolution::XdgConfig => write!(f, "xdg"),
            ConfigResolution::SystemConfig => write!(f, "system"),
            ConfigResolution::Default => write!(f, "default"),
        }
    }
}

/// Where a loaded config came from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file, or None if using defaults
    pub path: Option<String>,
    /// SHA-256 hash of file contents, or None if defaults
    pub hash: Option<String>,
    pub resolution: ConfigResolution,
}

impl ConfigSource {
    pub fn defaults() -> Self {
        Self {
            path: None,
            hash: None,
            resolution: ConfigResolution::Default,
        }
    }
}

/// Candidate locations searched after the explicit ones.
#[derive(Debug, Clone, Default)]
pub struct SearchLocations {
    pub env_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub xdg_dir: Option<PathBuf>,
    pub system_dir: Option<PathBuf>,
}

impl SearchLocations {
    /// Locations taken from the process environment.
    pub fn from_env() -> Self {
        Self {
            env_path: env::var_os(ENV_CONFIG_PATH).map(PathBuf::from),
            working_dir: env::current_dir().ok(),
            xdg_dir: dirs::config_dir().map(|d| d.join(APP_NAME)),
            system_dir: Some(PathBuf::from("/etc").join(APP_NAME)),
        }
    }
}

/// Configuration resolver with deterministic resolution order.
#[derive(Debug)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
    locations: SearchLocations,
}

impl ConfigResolver {
    /// Create a resolver honouring the CLI path and the process environment.
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self {
            cli_path,
            locations: SearchLocations::from_env(),
        }
    }

    /// Create a resolver with explicit search locations.
    pub fn with_locations(cli_path: Option<PathBuf>, locations: SearchLocations) -> Self {
        Self {
            cli_path,
            locations,
        }
    }

    /// Resolve the config file path.
    ///
    /// Explicit paths (CLI, env) are returned even if missing so that
    /// loading reports them; implicit locations must exist.
    pub fn resolve_path(&self) -> (Option<PathBuf>, ConfigResolution) {
        if let Some(ref path) = self.cli_path {
            return (Some(path.clone()), ConfigResolution::CliFlag);
        }

        if let Some(ref path) = self.locations.env_path {
            return (Some(path.clone()), ConfigResolution::EnvVar);
        }

        let implicit = [
            (
                self.locations.working_dir.as_ref().map(|d| d.join(LOCAL_FILENAME)),
                ConfigResolution::WorkingDir,
            ),
            (
                self.locations.xdg_dir.as_ref().map(|d| d.join(CONFIG_FILENAME)),
                ConfigResolution::XdgConfig,
            ),
            (
                self.locations.system_dir.as_ref().map(|d| d.join(CONFIG_FILENAME)),
                ConfigResolution::SystemConfig,
            ),
        ];

        for (candidate, resolution) in implicit {
            if let Some(path) = candidate {
                if path.is_file() {
                    return (Some(path), resolution);
                }
            }
        }

        (None, ConfigResolution::Default)
    }

    /// Load config from the resolved path or defaults.
    pub fn load(&self) -> Result<(Config, ConfigSource)> {
        let (path, resolution) = self.resolve_path();

        let Some(p) = path else {
            return Ok((Config::default(), ConfigSource::defaults()));
        };

        if !p.exists() {
            return Err(Error::ConfigNotFound {
                path: p.display().to_string(),
            });
        }

        let content = fs::read_to_string(&p).map_err(|e| {
            Error::Config(format!("failed to read config from {}: {}", p.display(), e))
        })?;

        let hash = compute_sha256(&content);

        let config = Config::parse(&content, ConfigFormat::from_path(&p)).map_err(|e| {
            Error::InvalidConfig(format!("failed to parse {}: {}", p.display(), e))
        })?;

        Ok((
            config,
            ConfigSource {
                path: Some(p.to_string_lossy().to_string()),
                hash: Some(hash),
                resolution,
            },
        ))
    }
}

/// Compute SHA-256 hash of a string.
pub(crate) fn compute_sha256(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
