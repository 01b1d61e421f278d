//! Logging infrastructure for bqspend.
//!
//! Structured logging via the `tracing` ecosystem:
//!
//! - JSON lines written to `<log_dir>/bqspend.log` (daily rolling)
//! - Compact human-readable output on stderr
//! - `RUST_LOG` overrides the default filter
//!
//! ## Example
//!
//! ```no_run
//! use bqspend_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//! tracing::info!(project = "analytics-prod", "aggregation started");
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{CoreError, Result};

/// File name prefix of the rolling JSON log.
const LOG_FILE: &str = "bqspend.log";

/// Flushes the background log writer when dropped. Hold it until exit.
pub struct LogGuard {
    _file: WorkerGuard,
}

/// `RUST_LOG` if set, otherwise every `bqspend*` target at info (or debug).
fn level_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("bqspend={level}"))
    })
}

/// Open `<log_dir>/bqspend.log.<date>` behind a non-blocking writer.
fn open_log_file(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir).map_err(|source| CoreError::DirectoryCreation {
        path: log_dir.to_path_buf(),
        source,
    })?;
    Ok(tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE)))
}

/// Install the global subscriber: JSON lines to the log directory (default
/// `~/.bqspend/logs/`) and a compact stderr view. `verbose` lowers the
/// default level to debug and adds source locations on stderr.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = log_dir.map_or_else(default_log_dir, Ok)?;
    let (writer, guard) = open_log_file(&log_dir)?;

    let json = fmt::layer().json().with_writer(writer).with_ansi(false).boxed();
    let stderr = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_file(verbose)
        .with_line_number(verbose)
        .boxed();
    let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![json, stderr];

    tracing_subscriber::registry()
        .with(layers)
        .with(level_filter(verbose))
        .try_init()
        .map_err(|e| CoreError::LoggingInit { message: e.to_string() })?;

    tracing::debug!(log_dir = %log_dir.display(), verbose, "Logging initialized");
    Ok(LogGuard { _file: guard })
}

/// Initialize minimal console-only logging for testing.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Get the default log directory path.
///
/// Returns `~/.bqspend/logs/`
pub fn default_log_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| CoreError::missing_env("HOME"))?;

    Ok(PathBuf::from(home).join(".bqspend").join("logs"))
}

/// Log a run-level event under the `bqspend::run` target.
///
/// # Example
///
/// ```ignore
/// log_run_event!("analytics-prod", "completed", summaries = 42);
/// ```
#[macro_export]
macro_rules! log_run_event {
    ($project:expr, $event:expr) => {
        tracing::info!(
            target: "bqspend::run",
            project = $project,
            event = $event,
            "run event"
        )
    };
    ($project:expr, $event:expr, $($field:tt)*) => {
        tracing::info!(
            target: "bqspend::run",
            project = $project,
            event = $event,
            $($field)*,
            "run event"
        )
    };
}
