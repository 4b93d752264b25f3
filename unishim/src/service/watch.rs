//! Sandbox-level watchers.

use super::ShimEvent;
use crate::sandbox::Sandbox;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use unishim_shared::errors::ShimError;

/// Publish the first fault reported by the sandbox monitor.
pub(crate) async fn watch_sandbox(
    mut monitor: mpsc::Receiver<ShimError>,
    events: broadcast::Sender<ShimEvent>,
) {
    match monitor.recv().await {
        Some(fault) => {
            error!(error = %fault, "sandbox monitor reported a fault");
            let _ = events.send(ShimEvent::SandboxFault {
                error: fault.to_string(),
            });
        }
        None => debug!("sandbox monitor closed"),
    }
}

/// Publish OOM events until the sandbox stops providing them.
pub(crate) async fn watch_oom(
    sandbox: Arc<dyn Sandbox>,
    events: broadcast::Sender<ShimEvent>,
    retry_delay: Duration,
) {
    loop {
        match sandbox.oom_event().await {
            Ok(container_id) => {
                warn!(container_id = %container_id, "container killed by oom");
                let _ = events.send(ShimEvent::Oom { container_id });
            }
            Err(ShimError::Unavailable(reason)) => {
                info!(reason = %reason, "oom events unavailable, stopping watcher");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to get oom event");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
