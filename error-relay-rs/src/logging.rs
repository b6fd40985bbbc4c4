//! # Structured Logging
//!
//! Subscriber set-up for services embedding the relay, and the local
//! diagnostic record every released failure gets regardless of whether the
//! webhook send succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use once_cell::sync::OnceCell;
use serde::{Serialize, Deserialize};
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::RollingFileAppender;
use crate::aggregator::FailureSignature;
use crate::context::ContextPacket;
use crate::types::{Error, ErrorKind, Result};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Keeps the file writer flushing for the lifetime of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// Whether to output logs to a file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "error-relay".to_string(),
            json_format: false,
            file_output: false,
            log_dir: None,
        }
    }
}

/// Initializes the global subscriber. Later calls are no-ops.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    // JSON and text layers have distinct types, so each branch installs its own subscriber.
    let installed = if config.json_format {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true).with_target(true))
            .with(file_layer(&config));
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .with(file_layer(&config));
        tracing::subscriber::set_global_default(subscriber)
    };

    installed.map_err(|e| {
        Error::new(ErrorKind::Initialization, format!("Failed to set global subscriber: {}", e))
    })?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

// Optional daily-rolling file output
fn file_layer<S>(config: &LoggingConfig) -> Option<Box<dyn Layer<S> + Send + Sync + 'static>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if !config.file_output {
        return None;
    }
    let log_dir = config.log_dir.as_deref()?;

    let appender = RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        log_dir,
        format!("{}.log", config.service_name),
    );
    let (writer, guard) = NonBlocking::new(appender);
    let _ = FILE_GUARD.set(guard);

    Some(Box::new(fmt::layer().with_writer(writer).with_ansi(false)))
}

/// Logs a released failure with its full trace
pub fn log_failure(signature: &FailureSignature, packet: &ContextPacket) {
    tracing::error!(
        packet_id = %packet.id,
        time = %packet.time,
        error_type = %packet.failure.type_name(),
        error = %packet.failure,
        actor = ?packet.actor,
        scope = ?packet.scope,
        origin = ?packet.origin,
        trace = %signature,
        "Releasing error to log"
    );
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }

        Ok(base)
    }
}
