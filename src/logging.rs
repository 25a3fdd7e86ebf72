use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Maps the configured level (`INFO`, `debug`, `Warning`, ...) onto a filter directive.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

/// Initializes logging with console output and a daily-rotated JSON file under `log_dir`.
///
/// `RUST_LOG` takes precedence over `level`. The returned guard must be kept alive
/// for the lifetime of the process so buffered file logs are flushed on exit.
pub fn init_logging(level: &str, log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(level)));

    if let Err(e) = fs::create_dir_all(log_dir) {
        let console_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);
        // Console-only logging is still useful when the log dir is unwritable
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init();
        tracing::warn!(log_dir = %log_dir.display(), error = %e, "file logging disabled");
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "pipeline.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    Some(guard)
}
