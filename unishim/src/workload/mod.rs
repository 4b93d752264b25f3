//! Locally launched virtualized workloads.
//!
//! - **cmdline.rs**: argv assembly per binary flavor
//! - **command.rs**: subprocess ownership (attach stdio, start, wait)

mod cmdline;
mod command;

pub use cmdline::{WorkloadContext, build_argv};
pub use command::WorkloadCommand;
