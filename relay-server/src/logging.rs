//! Process-wide `tracing` subscriber

use std::fs::{File, OpenOptions};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the subscriber described by `config`.
///
/// `RUST_LOG` overrides the configured level. With `file_path` set, output
/// is appended to that file without colour codes.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let writer = match &config.file_path {
        Some(path) => BoxMakeWriter::new(Arc::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(std::io::stdout),
    };
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.file_path.is_none())
        .with_target(true);
    let layer = if config.format == "json" {
        layer.json().boxed()
    } else {
        layer.pretty().with_file(false).boxed()
    };

    tracing_subscriber::registry().with(filter).with(layer).try_init()?;
    Ok(())
}

fn open_log_file(path: &str) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
