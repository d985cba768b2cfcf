//! Structured logging foundation for jr-core.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for daemon and automation
//!
//! # Usage
//!
//! ```ignore
//! use jr_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//! use jr_core::log_event;
//!
//! init_logging(&LogConfig::resolve(None, None, None, None));
//!
//! let ctx = LogContext::for_run();
//! log_event!(ctx, INFO, event_names::SCAN_STARTED, Stage::Discover, "scanning");
//! ```
//!
//! stdout is reserved for command payloads; all log output goes to stderr.

pub mod config;
pub mod events;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, LogContext, Stage};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{self, IsTerminal};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Install the global subscriber. Later calls are no-ops.
///
/// Called once by the binary. Library code only ever logs through a
/// [`LogContext`] and never installs subscribers itself. The level comes
/// from `config` alone; `RUST_LOG` is already folded in by
/// [`LogConfig::resolve`].
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::default().add_directive(LevelFilter::from(config.level).into());
    let _ = tracing_subscriber::registry()
        .with(stderr_layer(config).with_filter(filter))
        .try_init();
}

fn stderr_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    match config.format {
        LogFormat::Jsonl => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_file(config.source_location)
                .with_line_number(config.source_location)
                .with_ansi(io::stderr().is_terminal());
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
    }
}

/// `run-` plus 12 hex digits, unique per invocation.
pub fn generate_run_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &hex[..12])
}

/// Stable per-machine id: the machine-id prefix, else a hash of the host
/// name, else random.
pub fn get_host_id() -> String {
    let machine_id = std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|id| id.len() >= 8 && id.is_ascii());
    if let Some(id) = machine_id {
        return format!("host-{}", &id[..8]);
    }

    let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());
    match hostname {
        Some(name) => {
            let mut hasher = DefaultHasher::new();
            name.hash(&mut hasher);
            format!("host-{:08x}", hasher.finish() as u32)
        }
        None => format!("host-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
    }
}

/// Structured event logging with context.
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::SCAN_STARTED, Stage::Discover, "Starting scan");
/// log_event!(ctx, WARN, event_names::STOP_TIMEOUT, Stage::Stop, "no exit",
///     pid = 1234, grace_ms = 10_000u64);
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::info!(
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            event = $event,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::debug!(
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            event = $event,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::warn!(
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            event = $event,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::error!(
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            event = $event,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();

        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn test_get_host_id() {
        let host_id = get_host_id();
        assert!(host_id.starts_with("host-"));
        assert!(host_id.len() >= 13);
    }

    #[test]
    fn test_log_event_reaches_scoped_subscriber() {
        let (subscriber, buffer) = crate::test_utils::capturing_subscriber();
        let ctx = LogContext::new("run-test", "host-test");

        tracing::subscriber::with_default(subscriber, || {
            crate::log_event!(
                ctx,
                WARN,
                event_names::STOP_TIMEOUT,
                Stage::Stop,
                format!("process {} ignored SIGTERM", 42),
                pid = 42u32
            );
        });

        let out = buffer.contents();
        assert!(out.contains("process 42 ignored SIGTERM"));
        assert!(out.contains("restart.stop_timeout"));
        assert!(out.contains("run-test"));
    }
}
