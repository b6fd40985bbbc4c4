//! # Relay Configuration
//!
//! Settings are layered: built-in defaults, then an optional config file,
//! then `ERROR_RELAY__*` environment variables (a `.env` file is honoured).

use std::collections::HashSet;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use crate::bridge::CommandErrorKind;
use crate::scheduler::DEFAULT_COOLDOWN;
use crate::formatter::{FormatSettings, DEFAULT_BATCH_LIMIT, DEFAULT_CHUNK_SIZE};
use crate::types::{Error, Result};

/// How the command-error hook treats errors raised by commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandErrorPolicy {
    /// Whether the relay handles command errors at all
    pub hijack: bool,
    /// Kinds that are dropped silently
    pub ignored: HashSet<CommandErrorKind>,
    /// Whether to skip escalation when a more local handler exists
    pub check_for_local_handlers: bool,
}

impl Default for CommandErrorPolicy {
    fn default() -> Self {
        Self {
            hijack: false,
            ignored: [CommandErrorKind::NotOwner, CommandErrorKind::CommandNotFound]
                .into_iter()
                .collect(),
            check_for_local_handlers: true,
        }
    }
}

/// Configuration for the error relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Webhook execute URL, `.../webhooks/{id}/{token}`
    pub webhook_url: String,
    /// Minimum spacing between two deliveries
    pub cooldown_secs: f64,
    /// Report panics through a process-wide panic hook
    pub hijack_global_errors: bool,
    pub command_errors: CommandErrorPolicy,
    /// Content posted with every report, e.g. `<@1234>` or `<@&role>`
    pub mention: Option<String>,
    pub chunk_size: usize,
    pub batch_limit: usize,
    /// Language tag of the code blocks holding the trace
    pub code_language: String,
    /// Timeout for webhook requests; none by default
    pub http_timeout_secs: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            cooldown_secs: 5.0,
            hijack_global_errors: false,
            command_errors: CommandErrorPolicy::default(),
            mention: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_limit: DEFAULT_BATCH_LIMIT,
            code_language: "rs".to_string(),
            http_timeout_secs: None,
        }
    }
}

impl RelayConfig {
    pub fn new<S: Into<String>>(webhook_url: S) -> Self {
        Self { webhook_url: webhook_url.into(), ..Self::default() }
    }

    /// Loads defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        let cfg = builder
            .add_source(
                ::config::Environment::with_prefix("ERROR_RELAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let loaded: RelayConfig = cfg.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.webhook_url.trim().is_empty() {
            return Err(Error::configuration("webhook_url must be set"));
        }
        let representable = Duration::try_from_secs_f64(self.cooldown_secs)
            .ok()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .is_some();
        if !representable {
            return Err(Error::configuration("cooldown_secs must be a non-negative number of seconds in range")
                .context("cooldown_secs", self.cooldown_secs));
        }
        if self.format_settings().chunk_budget() == 0 {
            return Err(Error::configuration("chunk_size leaves no room for trace text")
                .context("chunk_size", self.chunk_size));
        }
        if !(1..=DEFAULT_BATCH_LIMIT).contains(&self.batch_limit) {
            return Err(Error::configuration("batch_limit must be between 1 and 10")
                .context("batch_limit", self.batch_limit));
        }
        Ok(())
    }

    /// Cooldown as a duration; out-of-range values fall back to the default
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs).unwrap_or(DEFAULT_COOLDOWN)
    }

    pub fn format_settings(&self) -> FormatSettings {
        FormatSettings {
            chunk_size: self.chunk_size,
            batch_limit: self.batch_limit,
            code_language: self.code_language.clone(),
            mention: self.mention.clone(),
        }
    }
}

impl TryFrom<::config::Config> for RelayConfig {
    type Error = ::config::ConfigError;

    fn try_from(cfg: ::config::Config) -> std::result::Result<Self, Self::Error> {
        // Start with defaults and override from config where present.
        let mut base = RelayConfig::default();

        if let Ok(url) = cfg.get::<String>("error_relay.webhook_url") {
            base.webhook_url = url;
        }
        if let Ok(cooldown) = cfg.get::<f64>("error_relay.cooldown_secs") {
            base.cooldown_secs = cooldown;
        }
        if let Ok(hijack) = cfg.get::<bool>("error_relay.hijack_global_errors") {
            base.hijack_global_errors = hijack;
        }
        if let Ok(policy) = cfg.get::<CommandErrorPolicy>("error_relay.command_errors") {
            base.command_errors = policy;
        }
        if let Ok(mention) = cfg.get::<String>("error_relay.mention") {
            base.mention = Some(mention);
        }
        if let Ok(chunk_size) = cfg.get::<usize>("error_relay.chunk_size") {
            base.chunk_size = chunk_size;
        }
        if let Ok(batch_limit) = cfg.get::<usize>("error_relay.batch_limit") {
            base.batch_limit = batch_limit;
        }
        if let Ok(language) = cfg.get::<String>("error_relay.code_language") {
            base.code_language = language;
        }
        if let Ok(timeout) = cfg.get::<u64>("error_relay.http_timeout_secs") {
            base.http_timeout_secs = Some(timeout);
        }

        Ok(base)
    }
}
