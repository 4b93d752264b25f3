//! Argument vectors for locally launched workloads.
//!
//! Pure functions: execution metadata in, argv out.

use crate::config::ShimConfig;
use crate::sandbox::{BinaryKind, ExecData};
use oci_spec::runtime::Spec;
use serde::Serialize;
use std::path::Path;
use unishim_shared::constants::workload as wl_const;
use unishim_shared::errors::{ShimError, ShimResult};

/// Process settings taken from the container's OCI spec and passed to the
/// unikernel through its descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadContext {
    pub env: Vec<String>,
    pub cwd: Option<String>,
    /// Memory limit in MiB.
    pub mem_mib: Option<u64>,
}

impl WorkloadContext {
    pub fn from_spec(spec: &Spec) -> Self {
        let (env, cwd) = match spec.process() {
            Some(process) => {
                let cwd = process.cwd().to_string_lossy().into_owned();
                (
                    process.env().clone().unwrap_or_default(),
                    (!cwd.is_empty()).then_some(cwd),
                )
            }
            None => (Vec::new(), None),
        };

        let mem_mib = spec
            .linux()
            .as_ref()
            .and_then(|l| l.resources().as_ref())
            .and_then(|r| r.memory().as_ref())
            .and_then(|m| m.limit())
            .filter(|limit| *limit > 0)
            .map(|limit| limit as u64 >> 20)
            .filter(|mib| *mib > 0);

        Self { env, cwd, mem_mib }
    }
}

#[derive(Debug, Serialize)]
struct HvtNet<'a> {
    #[serde(rename = "if")]
    iface: &'a str,
    cloner: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    method: &'a str,
    addr: &'a str,
    mask: &'a str,
    gw: &'a str,
}

#[derive(Debug, Serialize)]
struct HvtBlock<'a> {
    source: &'a str,
    path: &'a str,
    fstype: &'a str,
    mountpoint: &'a str,
}

#[derive(Debug, Serialize)]
struct HvtDescriptor<'a> {
    cmdline: String,
    net: HvtNet<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blk: Option<HvtBlock<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mem: Option<String>,
}

/// Build the argv for the workload described by `data`.
///
/// # Errors
///
/// `ShimError::Precondition` when no binary kind or path is known.
pub fn build_argv(
    data: &ExecData,
    ctx: &WorkloadContext,
    config: &ShimConfig,
) -> ShimResult<Vec<String>> {
    let kind = data
        .binary_kind
        .ok_or_else(|| ShimError::Precondition("workload binary not found".into()))?;
    if data.binary_path.as_os_str().is_empty() {
        return Err(ShimError::Precondition(format!(
            "{} workload has no binary path",
            kind
        )));
    }

    match kind {
        BinaryKind::Pause | BinaryKind::Binary => Ok(vec![path_string(&data.binary_path)]),
        BinaryKind::Hvt => hvt_argv(data, ctx, config),
        BinaryKind::Qemu => Ok(qemu_argv(data, ctx, config)),
    }
}

fn hvt_argv(data: &ExecData, ctx: &WorkloadContext, config: &ShimConfig) -> ShimResult<Vec<String>> {
    let binary = path_string(&data.binary_path);
    let cmdline = data
        .binary_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.clone());

    let mask = if data.mask.is_empty() { "0" } else { &data.mask };
    let descriptor = HvtDescriptor {
        cmdline,
        net: HvtNet {
            iface: wl_const::GUEST_IFACE,
            cloner: "True",
            kind: "inet",
            method: "static",
            addr: &data.ip_address,
            mask,
            gw: &data.gateway,
        },
        blk: data.block_device.as_ref().map(|_| HvtBlock {
            source: wl_const::BLOCK_SOURCE,
            path: wl_const::BLOCK_PATH,
            fstype: wl_const::BLOCK_FSTYPE,
            mountpoint: wl_const::BLOCK_MOUNTPOINT,
        }),
        env: (!ctx.env.is_empty()).then_some(ctx.env.as_slice()),
        cwd: ctx.cwd.as_deref(),
        mem: ctx.mem_mib.map(|m| m.to_string()),
    };

    let mut argv = Vec::new();
    if let Some(ns) = netns_name(data.net_ns.as_deref()) {
        argv.extend(["ip".to_string(), "netns".to_string(), "exec".to_string(), ns]);
    }
    argv.push(path_string(&config.hvt_monitor));
    argv.push(format!("--net={}", tap(data, config)));
    if let Some(block) = &data.block_device {
        argv.push(format!("--disk={}", block));
    }
    argv.push(binary);
    argv.push(serde_json::to_string(&descriptor)?);
    Ok(argv)
}

fn qemu_argv(data: &ExecData, ctx: &WorkloadContext, config: &ShimConfig) -> Vec<String> {
    let mem = ctx.mem_mib.unwrap_or(config.qemu_memory_mib);
    let append = format!(
        "netdev.ipv4_addr={} netdev.ipv4_gw_addr={} netdev.ipv4_subnet_mask=255.255.255.255 --",
        data.ip_address, data.gateway
    );

    let mut argv: Vec<String> = vec![config.qemu_binary.clone()];
    argv.extend(["-cpu", "host", "-enable-kvm", "-m"].map(String::from));
    argv.push(mem.to_string());
    argv.extend(
        [
            "-nodefaults",
            "-no-acpi",
            "-display",
            "none",
            "-serial",
            "stdio",
            "-device",
            "isa-debug-exit",
            "-net",
            "nic,model=virtio",
            "-net",
        ]
        .map(String::from),
    );
    argv.push(format!("tap,script=no,ifname={}", tap(data, config)));
    argv.push("-kernel".to_string());
    argv.push(path_string(&data.binary_path));
    argv.push("-append".to_string());
    argv.push(append);
    argv
}

fn tap<'a>(data: &'a ExecData, config: &'a ShimConfig) -> &'a str {
    if data.tap.is_empty() {
        &config.default_tap
    } else {
        &data.tap
    }
}

/// `/var/run/netns/cni-1234` → `cni-1234`.
fn netns_name(path: Option<&Path>) -> Option<String> {
    path.and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
