//! Tracing setup.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::models::LoggingConfig;

/// Initialize the global tracing subscriber from config.
///
/// `RUST_LOG` wins over the configured level when set. Returns the appender
/// guard when file logging is enabled; dropping it flushes remaining logs.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log filter")?;

    if config.directory.is_empty() {
        let builder = fmt().with_env_filter(filter);
        if config.format == "json" {
            builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
        } else {
            builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
        }
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.directory, "drover.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let builder = fmt().with_env_filter(filter).with_writer(writer).with_ansi(false);
    if config.format == "json" {
        builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }

    Ok(Some(guard))
}
