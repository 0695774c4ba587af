use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LauncherConfig, app_data_dir};

/// Configuration for the logging system
pub struct LogConfig {
    /// Directory where log files will be stored
    pub log_dir: PathBuf,
    /// Prefix for log file names
    pub file_prefix: String,
    /// Maximum number of log files to keep (rotation)
    pub max_files: usize,
    /// Filter used when `RUST_LOG` is not set
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: app_data_dir().join("logs"),
            file_prefix: "debug_fulltrust".to_string(),
            max_files: 5,
            default_level: "info".to_string(),
        }
    }
}

impl From<&LauncherConfig> for LogConfig {
    fn from(config: &LauncherConfig) -> Self {
        let defaults = Self::default();
        Self {
            log_dir: config.log_dir.clone().unwrap_or(defaults.log_dir),
            max_files: config.log_max_files,
            default_level: config.log_level.clone(),
            ..defaults
        }
    }
}

/// Initialize the logging system with both file and stdout output
///
/// File output is JSON, rotated daily. Filtering follows `RUST_LOG` and falls back to
/// `default_level`.
///
/// # Log Targets
/// - `main` - Process lifecycle
/// - `launcher` - Connection state and dispatch
/// - `ipc`, `ipc::codec` - Pipe transport and framing
/// - `handlers::file_operations`, `handlers::app_launch`, `handlers::win32` - Message handlers
/// - `devices` - Drive arrival and removal
/// - `status`, `events` - Status center aggregation
/// - `config` - Settings files
///
/// # Example
/// ```bash
/// RUST_LOG=launcher=debug,handlers::file_operations=trace files-launcher
/// ```
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_files)
        .build(&config.log_dir)
        .context("Failed to create file appender")?;

    // The guard MUST be kept alive for the entire process lifetime
    let (non_blocking_file, worker_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_filter(env_filter.clone());

    let stdout_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(
        target: "main",
        log_dir = %config.log_dir.display(),
        max_files = config.max_files,
        "Logging system initialized"
    );

    Ok(LogGuard {
        _worker_guard: worker_guard,
    })
}

/// Flushes buffered file output when dropped.
pub struct LogGuard {
    _worker_guard: tracing_appender::non_blocking::WorkerGuard,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        tracing::info!(target: "main", "Flushing logs before shutdown");
    }
}
