//! Process collection from procfs.
//!
//! The pure read layer: snapshots of argument vectors, environment,
//! credentials and resource counts, with no opinion about what kind of
//! process is being read.

mod inspector;
pub mod proc_parsers;
mod types;

pub use inspector::{DiscoveryError, InspectError, ProcInspector};
pub use proc_parsers::{MemStats, StatInfo, StatusInfo};
pub use types::{format_memory, LaunchContext, MemoryUsage, ProcessSnapshot, ProcessState};
