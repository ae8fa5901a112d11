//! Tracing setup for the CLI and for session daemons.
//!
//! Client verbs log to stderr only, at `warn` unless `SHINEYSHOT_LOG` says
//! otherwise. A daemon also writes `<dir>/<name>.log`, since its stderr is
//! usually whatever terminal started it.

use shineyshot_session::dir::LOG_EXTENSION;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_ENV: &str = "SHINEYSHOT_LOG";
const DEBUG_ENV: &str = "SHINEYSHOT_DEBUG_LOG";

fn debug_forced() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_filter(default: &str) -> EnvFilter {
    if debug_forced() {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn init_console() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("warn"))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Logs to `log_file` and keeps warnings on stderr.
///
/// The returned guard flushes the file writer on drop. Falls back to
/// console logging if the file cannot be opened.
pub fn init_daemon(log_file: &Path) -> Option<WorkerGuard> {
    let (Some(dir), Some(stem)) = (log_file.parent(), log_file.file_stem()) else {
        init_console();
        return None;
    };

    let appender = match RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(stem.to_string_lossy())
        .filename_suffix(LOG_EXTENSION)
        .build(dir)
    {
        Ok(appender) => appender,
        Err(err) => {
            init_console();
            tracing::warn!(error = %err, path = %log_file.display(), "Failed to open session log");
            return None;
        }
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(env_filter("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN);

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
    Some(guard)
}
