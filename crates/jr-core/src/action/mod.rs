//! Restart execution: signals, process control and the restart state machine.

pub mod control;
pub mod restart;
pub mod signal;

pub use control::{ControlError, LaunchSpec, ProcessControl, SystemProcessControl};
pub use restart::{
    RestartError, RestartOrchestrator, RestartOutcome, RestartPlan, RestartPolicy, RestartState,
    StopOutcome,
};
pub use signal::{process_exists, send_signal, Signal, SignalError};
