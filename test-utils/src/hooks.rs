use async_trait::async_trait;
use oci_spec::runtime::Spec;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use unishim::HookRunner;
use unishim_shared::errors::{ShimError, ShimResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInvocation {
    pub net_ns: Option<PathBuf>,
    pub sandbox_id: String,
    pub bundle: PathBuf,
}

/// Hook runner that records invocations and optionally fails.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    invocations: Mutex<Vec<HookInvocation>>,
    failure: Option<String>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invocation returns `ShimError::Hook(message)`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub fn invocations(&self) -> Vec<HookInvocation> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl HookRunner for RecordingHooks {
    async fn post_start(
        &self,
        net_ns: Option<&Path>,
        _spec: &Spec,
        sandbox_id: &str,
        bundle: &Path,
    ) -> ShimResult<()> {
        self.invocations.lock().push(HookInvocation {
            net_ns: net_ns.map(Path::to_path_buf),
            sandbox_id: sandbox_id.to_string(),
            bundle: bundle.to_path_buf(),
        });
        match &self.failure {
            Some(message) => Err(ShimError::Hook(message.clone())),
            None => Ok(()),
        }
    }
}
