//! Error types for the shim.

/// Errors produced while starting, streaming or reaping a process.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    /// A programming-level precondition was violated (missing container
    /// type, missing sandbox handle, no workload binary).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A call delegated to the sandbox service failed.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Operation not valid in the current lifecycle state, including
    /// firing a one-shot signal twice.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The local workload process could not be launched.
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The remote end went away; callers should stop polling it.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ShimResult<T> = Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_display() {
        let err = ShimError::Precondition("container c1 type is empty".to_string());
        assert_eq!(
            err.to_string(),
            "precondition violated: container c1 type is empty"
        );
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ShimError = io_err.into();
        assert!(matches!(err, ShimError::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ShimError = json_err.into();
        assert!(matches!(err, ShimError::Json(_)));
    }
}
