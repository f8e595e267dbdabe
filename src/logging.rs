//! File logging. The terminal belongs to the UI, so log lines go to
//! `$XDG_DATA_HOME/folio/folio.log` instead of stderr.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter, e.g. `FOLIO_LOG=folio=debug`.
const LOG_ENV: &str = "FOLIO_LOG";

/// Install the global subscriber writing to `dir/folio.log`.
///
/// The returned guard flushes buffered lines when dropped; keep it alive
/// until the program exits.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let file_appender = tracing_appender::rolling::never(dir, "folio.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  tracing::info!(log_dir = %dir.display(), "Logging initialized");
  Ok(guard)
}
