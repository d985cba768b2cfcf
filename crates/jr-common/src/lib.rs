//! jretrofit common types and errors.
//!
//! This crate provides foundational types shared across jr-core modules:
//! - Common error types with stable codes
//! - Output formats
//! - Configuration loading, resolution and validation

pub mod config;
pub mod error;
pub mod output;

pub use config::{Config, ConfigResolver, ConfigSnapshot};
pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError};
pub use output::OutputFormat;
