//! # Relay Error Types
//!
//! Errors produced by the relay pipeline itself (configuration, webhook
//! transport, cancellation). These are distinct from the failures the relay
//! *reports*, which live in [`crate::failure`].

use std::fmt;
use std::error::Error as StdError;
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use crate::sanitization::redact_webhook_token;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categorizes what went wrong inside the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid or missing configuration
    Configuration,
    /// Logging or runtime set-up failed
    Initialization,
    /// The HTTP request to the sink could not be completed
    Transport,
    /// The sink answered with a non-success status
    Sink,
    /// The sink rejected the request because of its own rate limit
    RateLimited,
    /// Payload could not be encoded or decoded
    Serialization,
    /// A cooldown wait was interrupted by shutdown
    Cancelled,
    /// Internal invariant violation
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration Error"),
            ErrorKind::Initialization => write!(f, "Initialization Error"),
            ErrorKind::Transport => write!(f, "Transport Error"),
            ErrorKind::Sink => write!(f, "Sink Error"),
            ErrorKind::RateLimited => write!(f, "Rate Limit Error"),
            ErrorKind::Serialization => write!(f, "Serialization Error"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::Internal => write!(f, "Internal Error"),
        }
    }
}

/// Core error type of the relay
#[derive(Debug, Serialize)]
pub struct Error {
    /// A unique identifier for this error instance
    pub id: Uuid,
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Detailed error message
    pub message: String,
    /// The time when the error occurred
    pub timestamp: DateTime<Utc>,
    /// Additional context as key-value pairs
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Underlying cause (not serialized)
    #[serde(skip)]
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            context: serde_json::Map::new(),
            cause: None,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;

        if let Some(status) = self.context.get("status") {
            write!(f, " (HTTP {})", status)?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = match err.status() {
            Some(status) if status.as_u16() == 429 => ErrorKind::RateLimited,
            Some(_) => ErrorKind::Sink,
            None if err.is_decode() => ErrorKind::Serialization,
            None => ErrorKind::Transport,
        };

        // The request URL carries the webhook token
        let err = err.without_url();
        let message = redact_webhook_token(&format!("webhook request failed: {}", err));

        let mut error = Self::new(kind, message);
        if let Some(status) = err.status() {
            error = error.context("status", status.as_u16());
        }
        error.cause(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization, format!("JSON error: {}", err)).cause(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("failed to load configuration: {}", err)).cause(err)
    }
}
