//! Logging setup
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: `shellexec=info`)
//! - `SHELLEXEC_LOG_FORMAT`: `pretty` (default) or `json`

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_NAME: &str = "shellexec.log";

/// Install the global subscriber
///
/// With `log_dir`, records are also written (without colors) to
/// `<log_dir>/shellexec.log`. Keep the returned guard alive until exit so the
/// background writer flushes.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let log_format =
        std::env::var("SHELLEXEC_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("shellexec=info"))
        .context("Failed to create env filter")?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match log_format.as_str() {
        // Production: JSON structured logging
        "json" => registry.with(fmt::layer().json()).try_init(),
        // Development: Pretty formatting with colors
        _ => registry.with(fmt::layer().pretty()).try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
