//! Seams to the sandbox service and the hook runner.
//!
//! The shim core never talks to a VM or agent directly; everything it
//! needs from the sandbox goes through [`Sandbox`].

mod hooks;

pub use hooks::{HookRunner, OciHookRunner};

use crate::stream::ProcessStdio;
use async_trait::async_trait;
use oci_spec::runtime::Process;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::mpsc;
use unishim_shared::errors::{ShimError, ShimResult};

/// Token identifying a process entered into a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub token: String,
}

/// Capability interface of the sandbox service.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Start the sandbox itself.
    async fn start(&self) -> ShimResult<()>;

    async fn start_container(&self, container_id: &str) -> ShimResult<()>;

    /// Start an additional process inside a running container.
    async fn enter_container(&self, container_id: &str, cmd: &Process)
    -> ShimResult<ProcessHandle>;

    /// Raw stdio of a sandboxed process. The init process of a container
    /// uses the container id as its process id.
    async fn io_stream(&self, container_id: &str, process_id: &str) -> ShimResult<ProcessStdio>;

    async fn winsize_process(
        &self,
        container_id: &str,
        process_id: &str,
        height: u32,
        width: u32,
    ) -> ShimResult<()>;

    /// Block until the process exits and return its exit status.
    async fn wait_process(&self, container_id: &str, process_id: &str) -> ShimResult<i32>;

    /// Subscribe to sandbox faults. The receiver yields at most one error
    /// per fault and closes when the sandbox goes away.
    async fn monitor(&self) -> ShimResult<mpsc::Receiver<ShimError>>;

    /// Wait for the next OOM event and return the affected container id.
    ///
    /// `ShimError::Unavailable` means no more events will ever arrive.
    async fn oom_event(&self) -> ShimResult<String>;

    fn net_ns(&self) -> Option<PathBuf>;

    /// Metadata for launching a virtualized workload locally.
    fn exec_data(&self) -> ExecData;
}

/// Flavor of a workload binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    /// Sandbox pause binary, run as is.
    Pause,
    /// Plain executable, run as is.
    Binary,
    /// solo5 hvt unikernel.
    Hvt,
    /// Unikernel booted under qemu.
    Qemu,
}

impl BinaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryKind::Pause => "pause",
            BinaryKind::Binary => "binary",
            BinaryKind::Hvt => "hvt",
            BinaryKind::Qemu => "qemu",
        }
    }

    /// Whether the binary needs a virtualization monitor.
    pub fn is_virtualized(&self) -> bool {
        matches!(self, BinaryKind::Hvt | BinaryKind::Qemu)
    }
}

impl FromStr for BinaryKind {
    type Err = ShimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(BinaryKind::Pause),
            "binary" => Ok(BinaryKind::Binary),
            "hvt" => Ok(BinaryKind::Hvt),
            "qemu" => Ok(BinaryKind::Qemu),
            other => Err(ShimError::Config(format!("unknown binary kind: {}", other))),
        }
    }
}

impl std::fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution metadata reported by the sandbox for the workload path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecData {
    /// `None` when no workload binary was found.
    #[serde(default)]
    pub binary_kind: Option<BinaryKind>,
    #[serde(default)]
    pub binary_path: PathBuf,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub mask: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub tap: String,
    #[serde(default)]
    pub net_ns: Option<PathBuf>,
    #[serde(default)]
    pub block_device: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_kind_parses_known_flavors() {
        for kind in [
            BinaryKind::Pause,
            BinaryKind::Binary,
            BinaryKind::Hvt,
            BinaryKind::Qemu,
        ] {
            assert_eq!(kind.as_str().parse::<BinaryKind>().unwrap(), kind);
        }
        assert!("firecracker".parse::<BinaryKind>().is_err());
        assert!(BinaryKind::Hvt.is_virtualized());
        assert!(!BinaryKind::Pause.is_virtualized());
    }

    #[test]
    fn exec_data_deserializes_sparse_json() {
        let data: ExecData =
            serde_json::from_str(r#"{"binary_kind": "hvt", "binary_path": "/rootfs/redis.hvt"}"#)
                .unwrap();
        assert_eq!(data.binary_kind, Some(BinaryKind::Hvt));
        assert!(data.tap.is_empty());
        assert!(data.block_device.is_none());
    }
}
