//! Tracing subscriber setup.

use crate::config::LogConfig;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use unishim_shared::constants::logging as log_const;
use unishim_shared::errors::{ShimError, ShimResult};

/// Initialize tracing.
///
/// With `config.dir` set, logs go to `<dir>/unishim.log` with daily
/// rotation; otherwise to stderr. `RUST_LOG` wins over `config.filter`.
/// The returned guard must be kept alive to flush the background writer.
pub fn init_logging(config: &LogConfig) -> ShimResult<WorkerGuard> {
    let (non_blocking, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                ShimError::Config(format!(
                    "failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let file_appender = tracing_appender::rolling::daily(dir, log_const::LOG_FILE);
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ShimError::Config(format!("invalid log filter {:?}: {}", config.filter, e)))?;

    register_to_tracing(non_blocking, env_filter);
    Ok(guard)
}

/// Install the global subscriber. A subscriber that is already installed
/// is left in place.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_logging_creates_rolling_log() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LogConfig {
            dir: Some(log_dir.clone()),
            filter: "debug".to_string(),
        };

        let guard = init_logging(&config).unwrap();
        tracing::info!(container_id = "c1", "logging initialized");
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(
            names.iter().any(|n| n.starts_with(log_const::LOG_FILE)),
            "no log file in {names:?}"
        );
    }

    #[test]
    fn uncreatable_log_dir_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let config = LogConfig {
            dir: Some(blocker.join("logs")),
            filter: "info".to_string(),
        };
        assert!(matches!(init_logging(&config), Err(ShimError::Config(_))));
    }
}
