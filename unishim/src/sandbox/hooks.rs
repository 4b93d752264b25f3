//! OCI lifecycle hooks.

use async_trait::async_trait;
use oci_spec::runtime::{Hook, Spec};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};
use unishim_shared::errors::{ShimError, ShimResult};

/// Runs the post-start hooks of a container.
///
/// Callers treat the result as advisory.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn post_start(
        &self,
        net_ns: Option<&Path>,
        spec: &Spec,
        sandbox_id: &str,
        bundle: &Path,
    ) -> ShimResult<()>;
}

/// Executes `spec.hooks.poststart` on the host, each inside the sandbox
/// network namespace when one is given.
#[derive(Debug, Default, Clone)]
pub struct OciHookRunner;

impl OciHookRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HookRunner for OciHookRunner {
    async fn post_start(
        &self,
        net_ns: Option<&Path>,
        spec: &Spec,
        sandbox_id: &str,
        bundle: &Path,
    ) -> ShimResult<()> {
        let Some(hooks) = spec.hooks().as_ref().and_then(|h| h.poststart().as_ref()) else {
            return Ok(());
        };

        let state = serde_json::to_vec(&serde_json::json!({
            "ociVersion": spec.version(),
            "id": sandbox_id,
            "status": "running",
            "bundle": bundle,
            "annotations": spec.annotations(),
        }))?;

        for hook in hooks {
            run_hook(hook, net_ns, &state).await?;
        }
        info!(sandbox_id, count = hooks.len(), "poststart hooks completed");
        Ok(())
    }
}

async fn run_hook(hook: &Hook, net_ns: Option<&Path>, state: &[u8]) -> ShimResult<()> {
    let path = hook.path();
    let mut cmd = Command::new(path);

    if let Some(args) = hook.args()
        && let Some((arg0, rest)) = args.split_first()
    {
        cmd.arg0(arg0);
        cmd.args(rest);
    }

    cmd.env_clear();
    for entry in hook.env().iter().flatten() {
        if let Some((key, value)) = entry.split_once('=') {
            cmd.env(key, value);
        }
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    if let Some(ns) = net_ns {
        let ns_file = std::fs::File::open(ns).map_err(|e| {
            ShimError::Hook(format!("failed to open netns {}: {}", ns.display(), e))
        })?;
        unsafe {
            cmd.pre_exec(move || {
                nix::sched::setns(&ns_file, nix::sched::CloneFlags::CLONE_NEWNET)
                    .map_err(std::io::Error::from)
            });
        }
    }

    debug!(hook = %path.display(), "running poststart hook");

    let mut child = cmd
        .spawn()
        .map_err(|e| ShimError::Hook(format!("failed to spawn hook {}: {}", path.display(), e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A hook may exit without reading its state.
        let _ = stdin.write_all(state).await;
    }

    let status = match hook.timeout() {
        Some(secs) if secs > 0 => {
            match tokio::time::timeout(Duration::from_secs(secs as u64), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(ShimError::Hook(format!(
                        "hook {} timed out after {}s",
                        path.display(),
                        secs
                    )));
                }
            }
        }
        _ => child.wait().await?,
    };

    if !status.success() {
        return Err(ShimError::Hook(format!(
            "hook {} exited with {}",
            path.display(),
            status
        )));
    }
    Ok(())
}
