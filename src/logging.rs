//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber writing to stderr and, when a path
//! is configured, appending to the log file. Fatal pipeline errors are logged
//! through this subscriber before the process exits.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Logging configuration.
#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    /// Settings verbosity: 0 warn, 1 info, 2 debug, 3+ trace.
    pub verbosity: u8,
    pub file: Option<PathBuf>,
    /// Also write to stderr. Off when a terminal display owns the screen.
    pub stderr: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("failed to open log file: {0}")]
    File(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Level directive for a verbosity count.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(config.verbosity)));

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        None => None,
    };

    let stderr_layer = config
        .stderr
        .then(|| fmt::layer().with_writer(io::stderr).with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), "warn");
        assert_eq!(level_for_verbosity(1), "info");
        assert_eq!(level_for_verbosity(2), "debug");
        assert_eq!(level_for_verbosity(9), "trace");
    }

    #[test]
    fn test_init_writes_file_and_rejects_second_init() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("events.log");
        let config = LogConfig {
            verbosity: 1,
            file: Some(path.clone()),
            stderr: false,
        };
        // Another test binary thread may have installed a subscriber first.
        if init_logging(&config).is_ok() {
            tracing::warn!(target: "fleetwatch", "logging smoke test");
            assert!(path.exists());
            assert!(matches!(
                init_logging(&config),
                Err(LogError::AlreadyInitialized)
            ));
        }
    }
}
