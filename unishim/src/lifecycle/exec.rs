//! Exec entity: an extra process run inside an existing container.

use super::container::StdioConfig;
use super::state::ProcessRecord;
use oci_spec::runtime::Process;
use parking_lot::Mutex;

/// Terminal settings of an exec process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecTty {
    pub stdio: StdioConfig,
    pub height: u32,
    pub width: u32,
}

impl ExecTty {
    /// Both dimensions were set before start.
    pub fn has_winsize(&self) -> bool {
        self.height != 0 && self.width != 0
    }
}

#[derive(Debug)]
pub struct Exec {
    id: String,
    container_id: String,
    cmd: Process,
    tty: Mutex<ExecTty>,
    /// Token the sandbox assigned when the process entered the container.
    process_id: Mutex<Option<String>>,
    process: ProcessRecord,
}

impl Exec {
    pub fn new(
        container_id: impl Into<String>,
        id: impl Into<String>,
        cmd: Process,
        stdio: StdioConfig,
    ) -> Self {
        let id = id.into();
        let container_id = container_id.into();
        let span = tracing::info_span!("exec", container_id = %container_id, exec_id = %id);
        Self {
            id,
            container_id,
            cmd,
            tty: Mutex::new(ExecTty {
                stdio,
                height: 0,
                width: 0,
            }),
            process_id: Mutex::new(None),
            process: ProcessRecord::new(span),
        }
    }

    /// Pre-set the terminal size applied right after the process starts.
    pub fn with_winsize(self, height: u32, width: u32) -> Self {
        self.set_winsize(height, width);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// OCI process description the sandbox runs.
    pub fn cmd(&self) -> &Process {
        &self.cmd
    }

    pub fn tty(&self) -> ExecTty {
        self.tty.lock().clone()
    }

    pub(crate) fn set_winsize(&self, height: u32, width: u32) {
        let mut tty = self.tty.lock();
        tty.height = height;
        tty.width = width;
    }

    pub fn process_id(&self) -> Option<String> {
        self.process_id.lock().clone()
    }

    pub(crate) fn set_process_id(&self, token: String) {
        *self.process_id.lock() = Some(token);
    }

    pub fn process(&self) -> &ProcessRecord {
        &self.process
    }
}
