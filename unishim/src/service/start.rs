//! Starting containers and execs.
//!
//! Every start path arms a [`StartGuard`] on the entity's process record
//! before its first fallible step. The guard is disarmed right before the
//! detached wait task is spawned, so any error or cancellation in between
//! delivers the failure exit code exactly once and leaves the process out
//! of Running.

use super::wait::{ExitSource, reconcile};
use super::watch::{watch_oom, watch_sandbox};
use super::{Entity, ShimService};
use crate::lifecycle::{Container, ContainerType, Exec, ProcessRecord, Status};
use crate::sandbox::Sandbox;
use crate::workload::WorkloadCommand;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, error, info, warn};
use unishim_shared::constants::{exit as exit_const, workload as wl_const};
use unishim_shared::errors::{ShimError, ShimResult};

/// Undoes the Running flip and delivers the failure exit code on drop
/// unless disarmed.
struct StartGuard<'a> {
    process: &'a ProcessRecord,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    fn arm(process: &'a ProcessRecord) -> Self {
        Self {
            process,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            exit_code = exit_const::FAILED_START,
            "start failed, delivering failure exit code"
        );
        if self.process.revert_running() {
            debug!("process moved back to created");
        }
        if let Err(e) = self.process.exit.fire(exit_const::FAILED_START) {
            error!(error = %e, "failure exit code not delivered");
        }
    }
}

fn check_startable(status: Status, what: &str) -> ShimResult<()> {
    if status.can_transition_to(Status::Running) {
        Ok(())
    } else {
        Err(ShimError::InvalidState(format!("{} is {}", what, status)))
    }
}

impl ShimService {
    /// Start a container's init process.
    ///
    /// The sandbox root container starts the sandbox itself. In unikernel
    /// mode the workload is launched locally after the sandbox has prepared
    /// its placeholder container; otherwise the sandbox runs the process
    /// and its stdio is streamed to the container's endpoints.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the container was already started (no failure
    ///   exit code is delivered)
    /// - `Precondition` if the container type or the sandbox is missing,
    ///   or no workload binary is known in unikernel mode
    /// - sandbox, stream and spawn errors, propagated
    pub async fn start_container(&self, container: &Arc<Container>) -> ShimResult<()> {
        let span = container.process().span().clone();
        self.start_container_inner(container).instrument(span).await
    }

    async fn start_container_inner(&self, container: &Arc<Container>) -> ShimResult<()> {
        let process = container.process();
        check_startable(process.status(), &format!("container {}", container.id()))?;

        let guard = StartGuard::arm(process);

        let kind = container.kind().ok_or_else(|| {
            ShimError::Precondition(format!("container {} type is not set", container.id()))
        })?;
        let sandbox = self.require_sandbox()?;

        let unikernel = self.inner.config.unikernel;
        let exec_data = sandbox.exec_data();
        debug!(
            ?kind,
            unikernel,
            binary_kind = ?exec_data.binary_kind,
            binary_path = %exec_data.binary_path.display(),
            "starting container"
        );
        if unikernel && exec_data.binary_kind.is_none() {
            return Err(ShimError::Precondition(format!(
                "workload binary not found for container {}",
                container.id()
            )));
        }

        let placeholder_id = format!("{}{}", container.id(), wl_const::CONTAINER_SUFFIX);
        match (kind, unikernel) {
            (ContainerType::SandboxRoot, true) => {
                sandbox.start().await?;
                sandbox.start_container(&placeholder_id).await?;
            }
            (ContainerType::SandboxRoot, false) => {
                sandbox.start().await?;
                let monitor = sandbox.monitor().await?;
                self.spawn_watchers(&sandbox, monitor);
            }
            (ContainerType::PlainContainer, true) => {
                sandbox.start_container(&placeholder_id).await?;
            }
            (ContainerType::PlainContainer, false) => {
                sandbox.start_container(container.id()).await?;
            }
        }
        info!(?kind, unikernel, "container started in sandbox");

        self.run_post_start_hooks(&sandbox, container).await;

        let entity = Entity::Container(container.clone());
        let events = self.inner.events.clone();

        if unikernel {
            let mut workload =
                WorkloadCommand::new(&exec_data, container.clone(), &self.inner.config)?;
            workload.attach_stdio(&self.inner.pool)?;
            workload.start()?;

            guard.disarm();
            let (tx, rx) = oneshot::channel();
            process.spawn(async move {
                let _ = tx.send(workload.wait().await);
            });
            process.spawn(reconcile(entity, ExitSource::Local(rx), events));
        } else {
            process.set_running()?;
            let stdio = sandbox
                .io_stream(container.id(), container.id())
                .await?;
            self.attach_streams(process, container.stdio(), stdio)?;

            guard.disarm();
            let source = ExitSource::Sandbox {
                sandbox,
                process_id: container.id().to_string(),
            };
            process.spawn(reconcile(entity, source, events));
        }
        Ok(())
    }

    /// Start an exec process inside a running container.
    ///
    /// Lookup errors are returned without delivering an exit code; every
    /// later error delivers the failure exit code on the exec.
    pub async fn start_exec(&self, container_id: &str, exec_id: &str) -> ShimResult<Arc<Exec>> {
        let container = self.container(container_id)?;
        let exec = container.exec(exec_id)?;
        let span = exec.process().span().clone();
        self.start_exec_inner(container, exec.clone())
            .instrument(span)
            .await?;
        Ok(exec)
    }

    async fn start_exec_inner(&self, container: Arc<Container>, exec: Arc<Exec>) -> ShimResult<()> {
        let process = exec.process();
        check_startable(process.status(), &format!("exec {}", exec.id()))?;

        let guard = StartGuard::arm(process);
        let sandbox = self.require_sandbox()?;

        let handle = sandbox
            .enter_container(container.id(), exec.cmd())
            .await
            .map_err(|e| {
                ShimError::Sandbox(format!("cannot enter container {}: {}", container.id(), e))
            })?;
        exec.set_process_id(handle.token.clone());
        process.set_running()?;
        info!(process_id = %handle.token, "exec entered container");

        let tty = exec.tty();
        if tty.has_winsize() {
            sandbox
                .winsize_process(container.id(), &handle.token, tty.height, tty.width)
                .await?;
        }

        let stdio = sandbox.io_stream(container.id(), &handle.token).await?;
        self.attach_streams(process, &tty.stdio, stdio)?;

        guard.disarm();
        let source = ExitSource::Sandbox {
            sandbox,
            process_id: handle.token,
        };
        process.spawn(reconcile(
            Entity::Exec(container, exec.clone()),
            source,
            self.inner.events.clone(),
        ));
        Ok(())
    }

    async fn run_post_start_hooks(&self, sandbox: &Arc<dyn Sandbox>, container: &Container) {
        let Some(spec) = container.spec() else {
            return;
        };
        let net_ns = sandbox.net_ns();
        if let Err(e) = self
            .inner
            .hooks
            .post_start(net_ns.as_deref(), spec, sandbox.id(), container.bundle())
            .await
        {
            warn!(error = %e, "failed to run post-start hooks");
        }
    }

    fn spawn_watchers(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        monitor: tokio::sync::mpsc::Receiver<ShimError>,
    ) {
        let span = tracing::info_span!("sandbox", sandbox_id = %sandbox.id());
        let events = self.inner.events.clone();

        self.inner
            .tasks
            .spawn(watch_sandbox(monitor, events.clone()).instrument(span.clone()));
        self.inner.tasks.spawn(
            watch_oom(sandbox.clone(), events, self.inner.config.oom_retry_delay())
                .instrument(span),
        );
    }
}
