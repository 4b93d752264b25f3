//! Shim service: entity registry and the task-API operations.
//!
//! - **start.rs**: starting containers and execs, with the failure guard
//! - **wait.rs**: reconciliation of exit code, I/O drain and status
//! - **watch.rs**: sandbox fault and OOM watchers

mod start;
mod wait;
mod watch;

use crate::config::ShimConfig;
use crate::lifecycle::{Container, Exec, ProcessRecord, ProcessState, StdioConfig};
use crate::sandbox::{HookRunner, Sandbox};
use crate::stream::{BufferPool, IoCopy, ProcessStdio, TtyIo};
use crate::util::task::TaskSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::debug;
use unishim_shared::errors::{ShimError, ShimResult};

const EVENT_CAPACITY: usize = 128;

// ============================================================================
// EVENTS
// ============================================================================

/// Events published to task API subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimEvent {
    /// A container init process or exec exited.
    Exit {
        container_id: String,
        exec_id: Option<String>,
        exit_code: u32,
    },
    /// The sandbox reported an out-of-memory kill.
    Oom { container_id: String },
    /// The sandbox monitor reported a fatal fault.
    SandboxFault { error: String },
}

// ============================================================================
// SERVICE
// ============================================================================

/// Process lifecycle service of one shim instance.
///
/// Cheap to clone; clones share the registry and the sandbox handle.
#[derive(Clone)]
pub struct ShimService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ShimConfig,
    sandbox: RwLock<Option<Arc<dyn Sandbox>>>,
    hooks: Arc<dyn HookRunner>,
    containers: RwLock<HashMap<String, Arc<Container>>>,
    pool: BufferPool,
    events: broadcast::Sender<ShimEvent>,
    /// Sandbox-level watchers.
    tasks: TaskSet,
}

impl ShimService {
    pub fn new(config: ShimConfig, hooks: Arc<dyn HookRunner>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ServiceInner {
                config,
                sandbox: RwLock::new(None),
                hooks,
                containers: RwLock::new(HashMap::new()),
                pool: BufferPool::default(),
                events,
                tasks: TaskSet::new("sandbox"),
            }),
        }
    }

    pub fn config(&self) -> &ShimConfig {
        &self.inner.config
    }

    /// Attach the sandbox created for this shim.
    pub fn set_sandbox(&self, sandbox: Arc<dyn Sandbox>) {
        *self.inner.sandbox.write() = Some(sandbox);
    }

    pub fn sandbox(&self) -> Option<Arc<dyn Sandbox>> {
        self.inner.sandbox.read().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ShimEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Register a created container.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the id is taken.
    pub fn add_container(&self, container: Container) -> ShimResult<Arc<Container>> {
        let mut containers = self.inner.containers.write();
        if containers.contains_key(container.id()) {
            return Err(ShimError::AlreadyExists(format!(
                "container {}",
                container.id()
            )));
        }
        let container = Arc::new(container);
        containers.insert(container.id().to_string(), container.clone());
        debug!(container_id = %container.id(), "container registered");
        Ok(container)
    }

    pub fn container(&self, container_id: &str) -> ShimResult<Arc<Container>> {
        self.inner
            .containers
            .read()
            .get(container_id)
            .cloned()
            .ok_or_else(|| ShimError::NotFound(format!("container {}", container_id)))
    }

    pub fn remove_container(&self, container_id: &str) -> Option<Arc<Container>> {
        self.inner.containers.write().remove(container_id)
    }

    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.inner.containers.read().values().cloned().collect()
    }

    fn entity(&self, container_id: &str, exec_id: Option<&str>) -> ShimResult<Entity> {
        let container = self.container(container_id)?;
        match exec_id {
            None => Ok(Entity::Container(container)),
            Some(exec_id) => {
                let exec = container.exec(exec_id)?;
                Ok(Entity::Exec(container, exec))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Task API operations
    // ------------------------------------------------------------------------

    /// Start a container's init process, or one of its execs.
    pub async fn start(&self, container_id: &str, exec_id: Option<&str>) -> ShimResult<()> {
        match exec_id {
            None => {
                let container = self.container(container_id)?;
                self.start_container(&container).await
            }
            Some(exec_id) => self.start_exec(container_id, exec_id).await.map(|_| ()),
        }
    }

    /// Block until the process has exited and return its exit code.
    pub async fn wait(&self, container_id: &str, exec_id: Option<&str>) -> ShimResult<u32> {
        let entity = self.entity(container_id, exec_id)?;
        entity.process().exit.wait().await
    }

    /// Release the process stdin once the stdin stream is done with it.
    pub async fn close_io(&self, container_id: &str, exec_id: Option<&str>) -> ShimResult<()> {
        let entity = self.entity(container_id, exec_id)?;
        let process = entity.process();

        process.stdin_closer.wait().await;
        if let Some(mut stdin) = process.stdin.take()
            && let Err(e) = stdin.shutdown().await
        {
            debug!(container_id, ?exec_id, error = %e, "closing process stdin failed");
        }
        Ok(())
    }

    /// Resize the terminal of a running process.
    ///
    /// An exec that has not started yet keeps the size for its start.
    pub async fn resize_pty(
        &self,
        container_id: &str,
        exec_id: Option<&str>,
        height: u32,
        width: u32,
    ) -> ShimResult<()> {
        let entity = self.entity(container_id, exec_id)?;
        let process_id = match &entity {
            Entity::Container(c) => {
                if !c.process().status().is_running() {
                    return Err(ShimError::InvalidState(format!(
                        "container {} is not running",
                        container_id
                    )));
                }
                container_id.to_string()
            }
            Entity::Exec(_, exec) => match exec.process_id() {
                Some(token) if exec.process().status().is_running() => token,
                _ => {
                    exec.set_winsize(height, width);
                    return Ok(());
                }
            },
        };

        let sandbox = self.require_sandbox()?;
        sandbox
            .winsize_process(container_id, &process_id, height, width)
            .await
    }

    pub fn state(&self, container_id: &str, exec_id: Option<&str>) -> ShimResult<ProcessState> {
        Ok(self.entity(container_id, exec_id)?.process().state())
    }

    /// Abort sandbox watchers and every entity's background tasks.
    pub fn shutdown(&self) {
        self.inner.tasks.abort();
        for container in self.containers() {
            container.abort_tasks();
        }
        debug!("shim service shut down");
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn require_sandbox(&self) -> ShimResult<Arc<dyn Sandbox>> {
        self.sandbox()
            .ok_or_else(|| ShimError::Precondition("sandbox has not been created".into()))
    }

    /// Hand the process stdio to a stream copy engine, or close the I/O
    /// signals right away when no external stream was requested.
    fn attach_streams(
        &self,
        process: &ProcessRecord,
        config: &StdioConfig,
        stdio: ProcessStdio,
    ) -> ShimResult<()> {
        let ProcessStdio {
            stdin,
            stdout,
            stderr,
        } = stdio;
        if let Some(stdin) = stdin {
            process.stdin.set(stdin);
        }

        if !config.is_configured() {
            process.exit_io.close();
            process.stdin_closer.close();
            return Ok(());
        }

        let tty = TtyIo::open(config)?;
        let copy = IoCopy::for_process(process, tty, stdout, stderr, self.inner.pool.clone());
        process.spawn(copy.run());
        Ok(())
    }
}

impl std::fmt::Debug for ShimService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimService")
            .field("config", &self.inner.config)
            .field("sandbox", &self.sandbox().map(|s| s.id().to_string()))
            .field("containers", &self.inner.containers.read().len())
            .finish()
    }
}

/// A container init process or an exec, with its parent container.
#[derive(Clone)]
pub(crate) enum Entity {
    Container(Arc<Container>),
    Exec(Arc<Container>, Arc<Exec>),
}

impl Entity {
    pub(crate) fn process(&self) -> &ProcessRecord {
        match self {
            Entity::Container(c) => c.process(),
            Entity::Exec(_, e) => e.process(),
        }
    }

    pub(crate) fn container_id(&self) -> &str {
        match self {
            Entity::Container(c) | Entity::Exec(c, _) => c.id(),
        }
    }

    pub(crate) fn exec_id(&self) -> Option<&str> {
        match self {
            Entity::Container(_) => None,
            Entity::Exec(_, e) => Some(e.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ContainerType;
    use crate::sandbox::OciHookRunner;

    fn service() -> ShimService {
        ShimService::new(ShimConfig::default(), Arc::new(OciHookRunner::new()))
    }

    #[test]
    fn registry_rejects_duplicates() {
        let svc = service();
        svc.add_container(Container::new("c1", Some(ContainerType::PlainContainer), "/b"))
            .unwrap();
        let err = svc
            .add_container(Container::new("c1", None, "/b"))
            .unwrap_err();
        assert!(matches!(err, ShimError::AlreadyExists(_)));

        assert!(svc.container("c1").is_ok());
        assert!(matches!(svc.container("c2"), Err(ShimError::NotFound(_))));
        assert!(svc.remove_container("c1").is_some());
        assert!(svc.containers().is_empty());
    }

    #[tokio::test]
    async fn start_unknown_container_is_not_found() {
        let svc = service();
        let err = svc.start("missing", None).await.unwrap_err();
        assert!(matches!(err, ShimError::NotFound(_)));
    }

    #[test]
    fn state_reports_created() {
        let svc = service();
        svc.add_container(Container::new("c1", Some(ContainerType::PlainContainer), "/b"))
            .unwrap();
        let state = svc.state("c1", None).unwrap();
        assert_eq!(state.status, crate::lifecycle::Status::Created);
        assert_eq!(state.exit_code, None);
    }
}
