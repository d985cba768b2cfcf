//! Logging configuration.
//!
//! Layers, lowest precedence first: the `log` section of the config file,
//! the environment (`JR_LOG`, then `RUST_LOG`; `JR_LOG_FORMAT`), and the CLI
//! flags (`-v`/`-q`, `--log-format`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

pub const ENV_LOG_LEVEL: &str = "JR_LOG";
pub const ENV_LOG_FORMAT: &str = "JR_LOG_FORMAT";

/// Where log lines go on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Console lines for people.
    #[default]
    #[value(alias = "text")]
    Human,
    /// One JSON object per event.
    #[value(alias = "json")]
    Jsonl,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "text" | "console" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            other => Err(format!("unknown log format '{}' (expected human or jsonl)", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum severity, most verbose first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

/// Accepted spellings per level.
const LEVEL_NAMES: &[(LogLevel, &[&str])] = &[
    (LogLevel::Trace, &["trace"]),
    (LogLevel::Debug, &["debug"]),
    (LogLevel::Info, &["info"]),
    (LogLevel::Warn, &["warn", "warning"]),
    (LogLevel::Error, &["error"]),
    (LogLevel::Off, &["off", "none", "quiet"]),
];

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        LEVEL_NAMES
            .iter()
            .find(|(level, _)| *level == self)
            .map(|(_, names)| names[0])
            .unwrap_or("info")
    }

    /// Level implied by `-v` repetitions and `-q`. `None` leaves lower
    /// layers in charge.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Option<LogLevel> {
        if quiet {
            return Some(LogLevel::Error);
        }
        match verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }

    /// Most verbose level named in a `RUST_LOG` directive string.
    fn from_directives(directives: &str) -> Option<LogLevel> {
        directives
            .split(',')
            .filter_map(|d| d.rsplit('=').next())
            .filter_map(|l| l.parse::<LogLevel>().ok())
            .filter(|l| *l != LogLevel::Off)
            .min()
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        LEVEL_NAMES
            .iter()
            .find(|(_, names)| names.contains(&wanted.as_str()))
            .map(|(level, _)| *level)
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

/// Effective logging settings handed to [`super::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Timestamps on human lines.
    pub timestamps: bool,
    /// File and line on human lines.
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
            source_location: false,
        }
    }
}

impl LogConfig {
    /// Layer file values, the process environment and CLI overrides.
    /// Unparseable file or environment values are ignored.
    pub fn resolve(
        file_level: Option<&str>,
        file_format: Option<&str>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        Self::resolve_with(file_level, file_format, cli_level, cli_format, |key| {
            std::env::var(key).ok()
        })
    }

    /// [`LogConfig::resolve`] with an explicit environment lookup.
    pub fn resolve_with(
        file_level: Option<&str>,
        file_format: Option<&str>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = LogConfig::default();

        let env_level = match env(ENV_LOG_LEVEL) {
            Some(v) => v.parse().ok(),
            None => env("RUST_LOG").and_then(|v| LogLevel::from_directives(&v)),
        };
        let env_format = env(ENV_LOG_FORMAT).and_then(|v| v.parse().ok());

        if let Some(level) = cli_level
            .or(env_level)
            .or_else(|| file_level.and_then(|s| s.parse().ok()))
        {
            config.level = level;
        }
        if let Some(format) = cli_format
            .or(env_format)
            .or_else(|| file_format.and_then(|s| s.parse().ok()))
        {
            config.format = format;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(" Warning ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("none".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(LogLevel::from_verbosity(0, false), None);
        assert_eq!(LogLevel::from_verbosity(1, false), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_verbosity(3, false), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_verbosity(2, true), Some(LogLevel::Error));
    }

    #[test]
    fn test_layer_precedence() {
        let env = env_of(&[("JR_LOG", "warn"), ("JR_LOG_FORMAT", "jsonl")]);

        let file_only = LogConfig::resolve_with(Some("debug"), Some("human"), None, None, env_of(&[]));
        assert_eq!(file_only.level, LogLevel::Debug);
        assert_eq!(file_only.format, LogFormat::Human);

        let with_env = LogConfig::resolve_with(Some("debug"), Some("human"), None, None, &env);
        assert_eq!(with_env.level, LogLevel::Warn);
        assert_eq!(with_env.format, LogFormat::Jsonl);

        let with_cli = LogConfig::resolve_with(
            Some("debug"),
            None,
            Some(LogLevel::Trace),
            Some(LogFormat::Human),
            &env,
        );
        assert_eq!(with_cli.level, LogLevel::Trace);
        assert_eq!(with_cli.format, LogFormat::Human);
    }

    #[test]
    fn test_rust_log_fallback() {
        let env = env_of(&[("RUST_LOG", "hyper=warn,jr_core=debug")]);
        let config = LogConfig::resolve_with(None, None, None, None, env);
        assert_eq!(config.level, LogLevel::Debug);

        // An unparseable JR_LOG still shadows RUST_LOG.
        let env = env_of(&[("JR_LOG", "loud"), ("RUST_LOG", "trace")]);
        let config = LogConfig::resolve_with(Some("error"), None, None, None, env);
        assert_eq!(config.level, LogLevel::Error);
    }

    #[test]
    fn test_bad_file_values_ignored() {
        let config = LogConfig::resolve_with(Some("loud"), Some("xml"), None, None, env_of(&[]));
        assert_eq!(config, LogConfig::default());
    }
}
