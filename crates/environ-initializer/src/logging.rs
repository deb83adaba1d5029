//! provides logging helpers

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

const LOG_FILE_PREFIX: &str = "environ-initializer.log";

/// initiate the global tracing subscriber
///
/// Logs always go to stderr. With `log_dir`, they are also written to a daily
/// rotated file; the returned guard must be held until exit to flush it.
pub(crate) fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let fmt_layer = utils::logging::get_fmt_layer();

    let Some(log_dir) = log_dir else {
        registry().with(fmt_layer).try_init()?;
        return Ok(None);
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(7)
        .build(log_dir)
        .with_context(|| format!("failed to create rolling file appender in {}", log_dir.display()))?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(utils::logging::env_filter());

    registry().with(fmt_layer).with(file_layer).try_init()?;
    Ok(Some(file_guard))
}
