//! Container entity.

use super::exec::Exec;
use super::state::ProcessRecord;
use oci_spec::runtime::Spec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unishim_shared::constants::annotations;
use unishim_shared::errors::{ShimError, ShimResult};

/// Which start strategy a container uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    /// The sandbox (pod) root container; starting it starts the sandbox.
    SandboxRoot,
    /// A workload container inside an already running sandbox.
    PlainContainer,
}

impl ContainerType {
    pub fn is_sandbox(&self) -> bool {
        matches!(self, ContainerType::SandboxRoot)
    }

    /// Derive the type from CRI annotations.
    ///
    /// Returns `None` when neither the containerd nor the CRI-O annotation
    /// is present or its value is unknown.
    pub fn from_annotations(values: &HashMap<String, String>) -> Option<Self> {
        [
            annotations::CRI_CONTAINER_TYPE,
            annotations::CRIO_CONTAINER_TYPE,
        ]
        .iter()
        .filter_map(|key| values.get(*key))
        .find_map(|value| match value.as_str() {
            annotations::SANDBOX => Some(ContainerType::SandboxRoot),
            annotations::CONTAINER => Some(ContainerType::PlainContainer),
            _ => None,
        })
    }

    pub fn from_spec(spec: &Spec) -> Option<Self> {
        spec.annotations().as_ref().and_then(Self::from_annotations)
    }
}

/// External stdio endpoints requested by the container manager.
///
/// `None` means the stream was not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioConfig {
    #[serde(default)]
    pub stdin: Option<PathBuf>,
    #[serde(default)]
    pub stdout: Option<PathBuf>,
    #[serde(default)]
    pub stderr: Option<PathBuf>,
    /// Terminal mode; stderr is merged into the terminal and never opened.
    #[serde(default)]
    pub terminal: bool,
}

impl StdioConfig {
    /// Build from task API strings, where an empty string means "not set".
    pub fn from_paths(stdin: &str, stdout: &str, stderr: &str, terminal: bool) -> Self {
        let path = |p: &str| (!p.is_empty()).then(|| PathBuf::from(p));
        Self {
            stdin: path(stdin),
            stdout: path(stdout),
            stderr: path(stderr),
            terminal,
        }
    }

    /// True if any stream was requested.
    pub fn is_configured(&self) -> bool {
        self.stdin.is_some() || self.stdout.is_some() || self.stderr.is_some()
    }
}

/// Shim-local record of a container and its init process.
#[derive(Debug)]
pub struct Container {
    id: String,
    kind: Option<ContainerType>,
    bundle: PathBuf,
    spec: Option<Spec>,
    stdio: StdioConfig,
    process: ProcessRecord,
    execs: Mutex<HashMap<String, Arc<Exec>>>,
}

impl Container {
    /// Create a container record in the Created state.
    ///
    /// `kind` is `None` when the container manager did not say which kind
    /// of container this is; starting such a container is rejected.
    pub fn new(
        id: impl Into<String>,
        kind: Option<ContainerType>,
        bundle: impl Into<PathBuf>,
    ) -> Self {
        let id = id.into();
        let span = tracing::info_span!("container", container_id = %id);
        Self {
            id,
            kind,
            bundle: bundle.into(),
            spec: None,
            stdio: StdioConfig::default(),
            process: ProcessRecord::new(span),
            execs: Mutex::new(HashMap::new()),
        }
    }

    /// Create a container from its OCI spec, taking the kind from the CRI
    /// annotations.
    pub fn from_spec(id: impl Into<String>, bundle: impl Into<PathBuf>, spec: Spec) -> Self {
        let kind = ContainerType::from_spec(&spec);
        Self::new(id, kind, bundle).with_spec(spec)
    }

    pub fn with_spec(mut self, spec: Spec) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn with_stdio(mut self, stdio: StdioConfig) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> Option<ContainerType> {
        self.kind
    }

    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    pub fn spec(&self) -> Option<&Spec> {
        self.spec.as_ref()
    }

    pub fn stdio(&self) -> &StdioConfig {
        &self.stdio
    }

    /// The init process lifecycle record.
    pub fn process(&self) -> &ProcessRecord {
        &self.process
    }

    /// Register an exec process.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if an exec with the same id is registered.
    pub fn add_exec(&self, exec: Exec) -> ShimResult<Arc<Exec>> {
        let mut execs = self.execs.lock();
        if execs.contains_key(exec.id()) {
            return Err(ShimError::AlreadyExists(format!(
                "exec {} in container {}",
                exec.id(),
                self.id
            )));
        }
        let exec = Arc::new(exec);
        execs.insert(exec.id().to_string(), exec.clone());
        Ok(exec)
    }

    pub fn exec(&self, exec_id: &str) -> ShimResult<Arc<Exec>> {
        self.execs.lock().get(exec_id).cloned().ok_or_else(|| {
            ShimError::NotFound(format!("exec {} in container {}", exec_id, self.id))
        })
    }

    pub fn remove_exec(&self, exec_id: &str) -> Option<Arc<Exec>> {
        self.execs.lock().remove(exec_id)
    }

    pub fn execs(&self) -> Vec<Arc<Exec>> {
        self.execs.lock().values().cloned().collect()
    }

    /// Abort the background tasks of the init process and every exec.
    pub fn abort_tasks(&self) {
        self.process.abort_tasks();
        for exec in self.execs() {
            exec.process().abort_tasks();
        }
    }

    /// Join the background tasks of the init process and every exec.
    pub async fn join_tasks(&self) {
        self.process.join_tasks().await;
        for exec in self.execs() {
            exec.process().join_tasks().await;
        }
    }
}
