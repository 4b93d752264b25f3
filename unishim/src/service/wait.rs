//! Reconciliation: turn a process exit into the entity's terminal state.

use super::{Entity, ShimEvent};
use crate::sandbox::Sandbox;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};
use unishim_shared::constants::exit as exit_const;
use unishim_shared::errors::{ShimError, ShimResult};

/// Where the exit code comes from.
pub(crate) enum ExitSource {
    /// The process runs in the sandbox.
    Sandbox {
        sandbox: Arc<dyn Sandbox>,
        process_id: String,
    },
    /// A local workload; its wait task sends the exit code.
    Local(oneshot::Receiver<ShimResult<i32>>),
}

/// Wait for the exit code and the I/O drain, then mark the process
/// Stopped, record the code and fire `exit`.
pub(crate) async fn reconcile(
    entity: Entity,
    source: ExitSource,
    events: broadcast::Sender<ShimEvent>,
) {
    let status = match source {
        ExitSource::Sandbox {
            sandbox,
            process_id,
        } => sandbox.wait_process(entity.container_id(), &process_id).await,
        ExitSource::Local(rx) => rx
            .await
            .unwrap_or_else(|_| Err(ShimError::Internal("workload wait task went away".into()))),
    };

    let code = match status {
        Ok(code) => u32::try_from(code).unwrap_or(exit_const::FAILED_START),
        Err(e) => {
            warn!(error = %e, "failed to wait for process");
            exit_const::FAILED_START
        }
    };

    let process = entity.process();
    process.exit_io.wait().await;
    process.mark_stopped();
    process.record_exit_code(code);

    if let Err(e) = process.exit.fire(code) {
        warn!(error = %e, "exit code already delivered");
    }
    info!(exit_code = code, "process exited");

    let _ = events.send(ShimEvent::Exit {
        container_id: entity.container_id().to_string(),
        exec_id: entity.exec_id().map(str::to_string),
        exit_code: code,
    });
}
