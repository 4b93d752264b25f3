//! Shim configuration.
//!
//! Loaded from JSON; every field has a default so an empty object is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use unishim_shared::constants::{logging as log_const, workload as wl_const};
use unishim_shared::errors::{ShimError, ShimResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimConfig {
    /// Run containers as locally launched unikernel workloads instead of
    /// delegating process start to the sandbox.
    #[serde(default)]
    pub unikernel: bool,

    /// solo5 hvt tender used for hvt workloads.
    #[serde(default = "default_hvt_monitor")]
    pub hvt_monitor: PathBuf,

    #[serde(default = "default_qemu_binary")]
    pub qemu_binary: String,

    /// Guest memory for qemu workloads, in MiB.
    #[serde(default = "default_qemu_memory_mib")]
    pub qemu_memory_mib: u64,

    /// Tap device used when the sandbox reports none.
    #[serde(default = "default_tap")]
    pub default_tap: String,

    /// Delay before retrying a failed OOM event read.
    #[serde(default = "default_oom_retry_delay_ms")]
    pub oom_retry_delay_ms: u64,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory for the rolling log file. Logs go to stderr when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_hvt_monitor() -> PathBuf {
    PathBuf::from(wl_const::HVT_MONITOR)
}

fn default_qemu_binary() -> String {
    wl_const::QEMU_BINARY.to_string()
}

fn default_qemu_memory_mib() -> u64 {
    wl_const::QEMU_MEMORY_MIB
}

fn default_tap() -> String {
    wl_const::DEFAULT_TAP.to_string()
}

fn default_oom_retry_delay_ms() -> u64 {
    1000
}

fn default_log_filter() -> String {
    log_const::DEFAULT_FILTER.to_string()
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            unikernel: false,
            hvt_monitor: default_hvt_monitor(),
            qemu_binary: default_qemu_binary(),
            qemu_memory_mib: default_qemu_memory_mib(),
            default_tap: default_tap(),
            oom_retry_delay_ms: default_oom_retry_delay_ms(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            filter: default_log_filter(),
        }
    }
}

impl ShimConfig {
    pub fn from_json(json: &str) -> ShimResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ShimError::Config(format!("invalid shim config: {}", e)))
    }

    pub fn from_file(path: &Path) -> ShimResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShimError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn oom_retry_delay(&self) -> Duration {
        Duration::from_millis(self.oom_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_object_yields_defaults() {
        let config = ShimConfig::from_json("{}").unwrap();
        assert_eq!(config, ShimConfig::default());
        assert!(!config.unikernel);
        assert_eq!(config.default_tap, "tap0_kata");
        assert_eq!(config.hvt_monitor, PathBuf::from("/opt/kata/bin/solo5-hvt"));
        assert_eq!(config.qemu_memory_mib, 128);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.oom_retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn partial_overrides() {
        let config = ShimConfig::from_json(
            r#"{"unikernel": true, "default_tap": "tap7", "log": {"dir": "/var/log/unishim"}}"#,
        )
        .unwrap();
        assert!(config.unikernel);
        assert_eq!(config.default_tap, "tap7");
        assert_eq!(config.log.dir, Some(PathBuf::from("/var/log/unishim")));
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.qemu_binary, "qemu-system-x86_64");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ShimConfig::from_json("{\"unikernel\": 3}").unwrap_err();
        assert!(matches!(err, ShimError::Config(_)));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shim.json");
        std::fs::write(&path, r#"{"qemu_memory_mib": 256}"#).unwrap();

        let config = ShimConfig::from_file(&path).unwrap();
        assert_eq!(config.qemu_memory_mib, 256);

        let missing = ShimConfig::from_file(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ShimError::Config(_))));
    }
}
