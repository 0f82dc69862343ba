//! Logging setup
//!
//! One entry point installs the global `tracing` subscriber. `RUST_LOG`
//! overrides the level chosen here.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    Stderr,
    /// Append to `<directory>/<YYYY-MM-DD>.log`
    DailyFile(PathBuf),
}

/// Destination and level for the running command
///
/// Debug mode always logs to stdout at `debug`. Otherwise the server writes
/// the daily file at `info` and one-shot commands write stderr at `warn`.
pub fn destination_for(config: &LoggingConfig, serving: bool) -> (LogDestination, &'static str) {
    if config.debug {
        (LogDestination::Stdout, "debug")
    } else if serving {
        (LogDestination::DailyFile(config.directory.clone()), "info")
    } else {
        (LogDestination::Stderr, "warn")
    }
}

/// Path of today's log file inside `directory`
pub fn daily_log_path(directory: &Path) -> PathBuf {
    directory.join(format!("{}.log", chrono::Local::now().format("%Y-%m-%d")))
}

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Fails when the log directory or file cannot be opened, or when a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig, serving: bool) -> Result<()> {
    let (destination, level) = destination_for(config, serving);

    let (writer, ansi) = match &destination {
        LogDestination::Stdout => (BoxMakeWriter::new(std::io::stdout), atty::is(atty::Stream::Stdout)),
        LogDestination::Stderr => (BoxMakeWriter::new(std::io::stderr), atty::is(atty::Stream::Stderr)),
        LogDestination::DailyFile(directory) => {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("failed to create log directory {}", directory.display())
            })?;
            let path = daily_log_path(directory);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    if config.json {
        tracing_subscriber::registry()
            .with(build_env_filter(level))
            .with(fmt::layer().json().with_writer(writer).with_target(false))
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
    } else {
        tracing_subscriber::registry()
            .with(build_env_filter(level))
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(false),
            )
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
