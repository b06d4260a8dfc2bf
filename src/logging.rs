//! Logging setup using tracing.
//!
//! Logs go to stderr, and additionally to a file when one is configured.
//! RUST_LOG takes precedence over the configured filter.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Filter from RUST_LOG, falling back to `fallback`.
pub fn filter(fallback: &str) -> Result<EnvFilter> {
  match EnvFilter::try_from_default_env() {
    Ok(filter) => Ok(filter),
    Err(_) => EnvFilter::try_new(fallback)
      .map_err(|e| eyre!("Invalid log filter {:?}: {}", fallback, e)),
  }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// as long as the program logs.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(true)
    .with_filter(filter(&config.filter)?);

  let Some(path) = &config.file else {
    tracing_subscriber::registry()
      .with(stderr_layer)
      .try_init()
      .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    return Ok(None);
  };

  let (directory, file_name) = split_log_path(path)?;
  std::fs::create_dir_all(directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::never(directory, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_filter(filter(&config.filter)?);

  tracing_subscriber::registry()
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

  tracing::debug!(file = %path.display(), "File logging enabled");
  Ok(Some(guard))
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
  let directory = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  Ok((directory, file_name))
}
