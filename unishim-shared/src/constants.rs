//! Shared constants
//!
//! Values that the shim core, its tests and external waiters must agree on.

/// Exit codes delivered on an entity's exit signal.
pub mod exit {
    /// Sentinel pushed when a process failed before or during start.
    pub const FAILED_START: u32 = 255;

    /// Offset added to the signal number when a process was killed by a signal.
    pub const SIGNAL_OFFSET: i32 = 128;
}

/// Stream copy constants.
pub mod io {
    /// Size of each pooled copy buffer (32 KiB).
    pub const BUF_SIZE: usize = 32 << 10;

    /// Upper bound on idle buffers retained by a pool.
    pub const POOL_MAX_IDLE: usize = 64;
}

/// CRI annotations carrying the container type.
pub mod annotations {
    /// containerd CRI plugin annotation.
    pub const CRI_CONTAINER_TYPE: &str = "io.kubernetes.cri.container-type";

    /// CRI-O annotation.
    pub const CRIO_CONTAINER_TYPE: &str = "io.kubernetes.cri-o.ContainerType";

    /// Annotation value for the sandbox (pause) container.
    pub const SANDBOX: &str = "sandbox";

    /// Annotation value for a regular container.
    pub const CONTAINER: &str = "container";
}

/// Virtualized-workload launch constants.
pub mod workload {
    /// Suffix appended to a container id when asking the sandbox for the
    /// companion placeholder of a locally executed workload.
    pub const CONTAINER_SUFFIX: &str = "-unikernel";

    /// Default solo5 hvt tender.
    pub const HVT_MONITOR: &str = "/opt/kata/bin/solo5-hvt";

    /// Default qemu binary for the qemu flavor.
    pub const QEMU_BINARY: &str = "qemu-system-x86_64";

    /// Default guest memory for the qemu flavor, in MiB.
    pub const QEMU_MEMORY_MIB: u64 = 128;

    /// Tap device used when the sandbox does not report one.
    pub const DEFAULT_TAP: &str = "tap0_kata";

    /// Guest-side interface name inside the unikernel descriptor.
    pub const GUEST_IFACE: &str = "ukvmif0";

    /// Block device defaults inside the unikernel descriptor.
    pub const BLOCK_SOURCE: &str = "etfs";
    pub const BLOCK_PATH: &str = "/dev/ld0a";
    pub const BLOCK_FSTYPE: &str = "blk";
    pub const BLOCK_MOUNTPOINT: &str = "/data";
}

/// Log file naming.
pub mod logging {
    /// Rolling log file prefix.
    pub const LOG_FILE: &str = "unishim.log";

    /// Filter used when RUST_LOG is unset.
    pub const DEFAULT_FILTER: &str = "info";
}
