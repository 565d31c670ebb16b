//! Log sink setup.
//!
//! Lines are formatted by `tracing-subscriber` and handed to a
//! `tracing-appender` background writer, so logging never blocks the reactor.
//! When the writer falls behind, lines are dropped.

use anyhow::{Context, Result, anyhow};
use ember_config::LogSection;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` overrides `[log] level`.
///
/// The returned guard flushes pending lines when dropped.
pub fn init(log: &LogSection) -> Result<WorkerGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&log.level)
            .with_context(|| format!("Invalid log level '{}'", log.level))?,
    };

    let (writer, guard) = match &log.directory {
        Some(directory) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
            directory,
            &log.file_prefix,
        )),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log.directory.is_none())
        .try_init()
        .map_err(|e| anyhow!(e))
        .context("Failed to install log subscriber")?;

    Ok(guard)
}
