//! Logging infrastructure.
//!
//! Structured logging via `tracing`, always to stdout and optionally to a
//! session log file (cleared on startup so each run starts clean).
//! Verbosity is controlled through the `RUST_LOG` environment variable and
//! defaults to `info`.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default log file name when file logging is enabled.
pub const DEFAULT_LOG_FILE: &str = "lasergui.log";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the file writer, if any.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initializes the global tracing subscriber.
///
/// Always logs to stdout; when `log_dir` is given, also writes
/// [`DEFAULT_LOG_FILE`] inside it (creating the directory and truncating
/// any previous session's file).
pub fn init_logging(log_dir: Option<&Path>) -> Result<LoggingGuard, io::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true);

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            fs::write(dir.join(DEFAULT_LOG_FILE), "")?;

            let appender = tracing_appender::rolling::never(dir, DEFAULT_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // init_logging installs a global subscriber, so only one test may call
    // it; the rest exercise the file handling directly.

    #[test]
    fn test_init_logging_creates_log_file() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");

        let guard = init_logging(Some(&log_dir));
        assert!(guard.is_ok());
        assert!(log_dir.join(DEFAULT_LOG_FILE).exists());
    }
}
