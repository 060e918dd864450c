//! Logging setup helpers.
//!
//! The bus itself only emits `tracing` events; embedding applications that
//! do not already install a subscriber can use [`setup_logging`] for a
//! reasonable default.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::error::{BusError, BusResult};

/// Configuration for the logging subscriber.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use.
    pub level: Level,
    /// Whether to emit JSON-formatted lines.
    pub json: bool,
    /// Whether to include file and line information.
    pub file_info: bool,
    /// Whether to log span lifecycles.
    pub log_spans: bool,
    /// Application name to include in the welcome line.
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "typebus".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Creates a new logging configuration.
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting.
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs.
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging.
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Installs a global `tracing` subscriber with the provided configuration.
pub fn setup_logging(config: LoggingConfig) -> BusResult<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let result = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    result.map_err(|err| BusError::InvalidConfig(format!("logging setup failed: {err}")))
}

/// Parses a log level from a string.
pub fn parse_log_level(level: &str) -> BusResult<Level> {
    Level::from_str(level)
        .map_err(|_| BusError::InvalidConfig(format!("invalid log level: {level}")))
}

/// Logs a welcome message with version info.
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("starting {} v{}", app_name, version);
}
