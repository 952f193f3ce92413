//! Logging setup: compact stderr output plus a JSON log file in the data directory

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter directive; `RUST_LOG` takes precedence
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live until exit.
/// When the log file cannot be opened only stderr logging is installed.
pub fn init(log_path: &Path, verbose: bool) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let stderr_format = fmt::format().with_target(false).with_level(true).compact();
    let stderr_layer = fmt::layer()
        .event_format(stderr_format)
        .with_writer(std::io::stderr);

    let file_appender = match file_appender(log_path) {
        Ok(appender) => appender,
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
            tracing::warn!("Logging to stderr only, cannot open {:?}: {}", log_path, e);
            return None;
        }
    };

    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Some(guard)
}

fn file_appender(log_path: &Path) -> anyhow::Result<RollingFileAppender> {
    let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("dockup.log");
    std::fs::create_dir_all(dir)?;

    Ok(RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)?)
}
