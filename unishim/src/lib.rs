//! unishim: process lifecycle and stdio streaming for a container shim.
//!
//! The shim starts container init processes and exec processes either
//! through a [`sandbox::Sandbox`] or, for unikernel workloads, as a local
//! subprocess; streams their stdio to the FIFOs handed over by the
//! container manager; and reports every exit exactly once.

pub mod config;
pub mod lifecycle;
pub mod sandbox;
pub mod service;
pub mod stream;
pub mod util;
pub mod workload;

pub use config::{LogConfig, ShimConfig};
pub use lifecycle::{
    Container, ContainerType, Exec, ExitSignal, Latch, ProcessState, Status, StdioConfig,
};
pub use sandbox::{BinaryKind, ExecData, HookRunner, OciHookRunner, ProcessHandle, Sandbox};
pub use service::{ShimEvent, ShimService};
pub use stream::{BoxedReader, BoxedWriter, ProcessStdio};
pub use unishim_shared::{ShimError, ShimResult};
pub use util::init_logging;
