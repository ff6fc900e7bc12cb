use std::io;

use anyhow::Result;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::domain::models::config::LoggingConfig;

/// Tracing subscriber handle. Dropping it flushes the non-blocking file
/// writer, so the caller must hold it for the process lifetime.
pub struct LoggerHandle {
    _guard: Option<WorkerGuard>,
}

impl LoggerHandle {
    /// Initializes the global tracing subscriber: stdout always, daily
    /// rotating file output additionally when `config.directory` is set.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

        let stdout_layer = if config.json {
            tracing_subscriber::fmt::layer().json().with_writer(io::stdout).with_target(true).boxed()
        } else {
            tracing_subscriber::fmt::layer().with_writer(io::stdout).with_target(true).boxed()
        };

        let guard = if let Some(ref directory) = config.directory {
            let file_appender = rolling::daily(directory, "fleetd.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry().with(env_filter).with(stdout_layer).with(file_layer).init();
            Some(guard)
        } else {
            tracing_subscriber::registry().with(env_filter).with(stdout_layer).init();
            None
        };

        tracing::info!(level = %config.level, json = config.json, file_output = config.directory.is_some(), "logger initialized");

        Ok(Self { _guard: guard })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => anyhow::bail!("invalid log level: {other}"),
    }
}
