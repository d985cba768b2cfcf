//! jretrofit core library.
//!
//! Finds running JVMs, decides which of them lack the configured
//! `-javaagent` flags and restarts them with the flags added:
//! - Process collection from procfs
//! - Java classification and agent extraction
//! - Filtering, exclusions and the injection gate
//! - Command-line rewriting
//! - Stop / start / verify restart orchestration
//! - Sequential, cancellable batch injection and the daemon loop
//!
//! The binary entry point is in `main.rs`.

pub mod action;
pub mod classify;
pub mod collect;
pub mod daemon;
pub mod exit_codes;
pub mod inject;
pub mod logging;
pub mod output;
pub mod policy;
pub mod rewrite;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock_process;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
