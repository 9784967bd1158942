use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber writing to a daily rotated file.
///
/// `RUST_LOG` takes precedence over the configured level. Keep the returned
/// guard alive until exit or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
  let directory = log_directory(config)?;
  std::fs::create_dir_all(&directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::daily(&directory, "resync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e))?;

  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

fn log_directory(config: &LoggingConfig) -> Result<PathBuf> {
  if let Some(dir) = &config.directory {
    return Ok(dir.clone());
  }
  dirs::data_local_dir()
    .map(|d| d.join("resync").join("logs"))
    .ok_or_else(|| eyre!("Could not determine a log directory; set logging.directory"))
}
