use nix::sys::stat::Mode;
use std::path::{Path, PathBuf};
use unishim::StdioConfig;

/// Create a FIFO named `name` in `dir`.
pub fn make_fifo(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    nix::unistd::mkfifo(&path, Mode::from_bits_truncate(0o600))
        .unwrap_or_else(|e| panic!("mkfifo {}: {}", path.display(), e));
    path
}

/// Create stdin/stdout/stderr FIFOs in `dir` and describe them.
pub fn fifo_stdio(dir: &Path, terminal: bool) -> StdioConfig {
    StdioConfig {
        stdin: Some(make_fifo(dir, "stdin")),
        stdout: Some(make_fifo(dir, "stdout")),
        stderr: Some(make_fifo(dir, "stderr")),
        terminal,
    }
}
