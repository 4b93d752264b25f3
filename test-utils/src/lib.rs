//! Test support for the unishim crates.
//!
//! - [`MockSandbox`]: scripted in-memory sandbox that records every call
//! - [`RecordingHooks`]: hook runner that records invocations
//! - FIFO helpers for external stdio endpoints

mod fifo;
mod hooks;
mod sandbox;

pub use fifo::{fifo_stdio, make_fifo};
pub use hooks::{HookInvocation, RecordingHooks};
pub use sandbox::{MockSandbox, ProcessPeers, SandboxCall, SandboxOp};
