//! Container and exec lifecycle state.
//!
//! Entities are created by the task API front-end, started by the service
//! and reaped by the reconciliation task. Each carries three one-shot
//! signals that external waiters observe.

mod container;
mod exec;
mod signal;
mod state;

pub use container::{Container, ContainerType, StdioConfig};
pub use exec::{Exec, ExecTty};
pub use signal::{ExitSignal, Latch};
pub use state::{ProcessRecord, ProcessState, Status};
