//! Logging setup and configuration

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup the tracing subscriber for the agent.
///
/// Always logs to the console; when `log_file` is set, additionally appends
/// plain-text (non-ANSI) output to that file. The returned guard must be kept
/// alive for the lifetime of the process so the file writer flushes.
pub fn setup_logging(default_level: &str, log_file: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    let console_layer = fmt::layer();

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(dir) = dir {
                std::fs::create_dir_all(dir)?;
            }
            let file_name = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("garmin-agent.log"));
            let appender = tracing_appender::rolling::never(
                dir.unwrap_or_else(|| Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
