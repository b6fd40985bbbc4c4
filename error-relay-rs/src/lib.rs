//! # Error Relay
//!
//! In-process error reporting for chat bots and long-running services.
//! Failures are deduplicated by their normalized trace, enriched with the
//! context they were raised in, and delivered to a webhook no faster than
//! one report per cooldown.
//!
//! ## Pipeline
//!
//! - [`failure`] captures an error and renders its trace
//! - [`aggregator`] groups occurrences by signature
//! - [`scheduler`] serializes and spaces out deliveries
//! - [`formatter`] turns a report into webhook messages
//! - [`sink`] posts them
//! - [`bridge`] connects the relay to a framework's error events
//!

pub mod types;
pub mod clock;
pub mod failure;
pub mod sanitization;
pub mod context;
pub mod aggregator;
pub mod scheduler;
pub mod formatter;
pub mod sink;
pub mod settings;
pub mod logging;
pub mod relay;
pub mod bridge;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use types::{Error, Result, ErrorKind};
pub use failure::Failure;
pub use context::{ContextPacket, OriginContext, CommandContext, InteractionContext, Origin};
pub use aggregator::{ErrorStore, FailureSignature};
pub use scheduler::DeliveryScheduler;
pub use formatter::{EntityResolver, NoopResolver};
pub use sink::{ErrorSink, WebhookSink};
pub use settings::{RelayConfig, CommandErrorPolicy};
pub use logging::init_logging;
pub use relay::ErrorRelay;
pub use bridge::{install_panic_hook, BridgeOutcome, CommandError, CommandErrorKind, CommandInvocation};

/// Initializes logging with default settings
pub fn init() -> Result<()> {
    init_logging(None)
}

/// Initializes logging and loads the relay configuration from `config`
pub fn init_with_config(config: ::config::Config) -> Result<RelayConfig> {
    let log_config = config.clone().try_into().ok();
    init_logging(log_config)?;

    let relay_config: RelayConfig = config.try_into()?;
    relay_config.validate()?;
    Ok(relay_config)
}
