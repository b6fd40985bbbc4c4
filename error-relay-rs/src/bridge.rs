//! # Framework Bridge
//!
//! Hooks the relay into a bot framework's error events: command errors,
//! background (global) errors, and panics.
//!
//! Command errors go through a small decision table. Ignorable kinds are
//! dropped, errors a more local handler will deal with are left alone, and
//! only errors raised from inside a command body are escalated to the relay.
//! Everything else is surfaced to the invoker as a reply.

use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use crate::context::OriginContext;
use crate::failure::Failure;
use crate::relay::ErrorRelay;
use crate::types::{Error, ErrorKind, Result};

/// Classification of the errors a command framework raises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    /// Invoker is not the bot owner
    NotOwner,
    /// No command matched the invocation
    CommandNotFound,
    /// A check on the command rejected the invoker
    CheckFailure,
    MissingArgument,
    BadArgument,
    OnCooldown,
    DisabledCommand,
    /// The command body itself raised
    Invoke,
    Other,
}

/// An error raised while running a command
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    pub kind: CommandErrorKind,
    pub message: String,
    /// What the command body raised, for [`CommandErrorKind::Invoke`]
    pub original: Option<Failure>,
}

impl CommandError {
    pub fn new<S: Into<String>>(kind: CommandErrorKind, message: S) -> Self {
        Self { kind, message: message.into(), original: None }
    }

    /// Wraps a failure raised from inside a command body
    pub fn invoke(original: Failure) -> Self {
        Self {
            kind: CommandErrorKind::Invoke,
            message: format!("Command raised an exception: {}", original),
            original: Some(original),
        }
    }
}

/// The host framework's view of one failed command invocation
#[async_trait]
pub trait CommandInvocation: Send + Sync {
    /// Who invoked the command, where, and which command it was
    fn origin(&self) -> OriginContext;

    /// Whether the host has overridden the framework-wide command error handler
    fn has_global_handler(&self) -> bool;

    /// Whether the command itself has an error handler
    fn command_has_handler(&self) -> bool;

    /// Whether the command's cog overrides its error handler
    fn cog_has_handler(&self) -> bool;

    /// Replies to the invoker in the channel the command was used in
    async fn reply(&self, content: &str) -> anyhow::Result<()>;
}

/// What the bridge did with a command error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Command error handling is switched off
    Disabled,
    /// A command, cog or host handler exists and takes precedence
    DeferredToLocalHandler,
    /// The error kind is configured as ignorable
    Ignored,
    /// The wrapped failure was recorded and submitted for delivery
    Escalated,
    /// The error message was sent back to the invoker
    Replied,
}

impl ErrorRelay {
    /// Handles an error raised while running a command.
    ///
    /// Only [`CommandErrorKind::Invoke`] errors reach the sink, and what is
    /// reported is the wrapped failure rather than the wrapper.
    pub async fn on_command_error(
        &self,
        invocation: &dyn CommandInvocation,
        error: CommandError,
    ) -> Result<BridgeOutcome> {
        let policy = &self.config().command_errors;

        if !policy.hijack {
            return Ok(BridgeOutcome::Disabled);
        }

        if policy.check_for_local_handlers
            && (invocation.command_has_handler()
                || invocation.cog_has_handler()
                || invocation.has_global_handler())
        {
            debug!(kind = ?error.kind, "Local error handler present; not handling");
            return Ok(BridgeOutcome::DeferredToLocalHandler);
        }

        if policy.ignored.contains(&error.kind) {
            debug!(kind = ?error.kind, "Ignoring command error");
            return Ok(BridgeOutcome::Ignored);
        }

        match error {
            CommandError { kind: CommandErrorKind::Invoke, original: Some(original), .. } => {
                self.record_and_submit(original, Some(invocation.origin())).await?;
                Ok(BridgeOutcome::Escalated)
            }
            other => {
                invocation.reply(&other.message).await.map_err(|e| {
                    Error::new(ErrorKind::Sink, format!("Failed to reply to invoker: {}", e))
                        .context("command_error_kind", format!("{:?}", other.kind))
                })?;
                Ok(BridgeOutcome::Replied)
            }
        }
    }

    /// Handles an error raised by an event handler or background task
    pub async fn on_error(&self, failure: Failure) -> Result<()> {
        self.record_and_submit(failure, None).await
    }

    /// Spawns `task` and reports its error, if any, as a global error
    pub fn supervise<F>(self: &Arc<Self>, task: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if let Err(delivery) = relay.on_error(Failure::from_anyhow(e)).await {
                    error!(error = %delivery, "Failed to report background task error");
                }
            }
        })
    }
}

tokio::task_local! {
    // Set for the lifetime of a task delivering a panic report
    static REPORTING_PANIC: ();
}

thread_local! {
    static IN_PANIC_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Routes panics to the relay, after the previously installed hook has run.
///
/// Does nothing unless `hijack_global_errors` is set. Returns whether the
/// hook was installed. Panics raised while a panic report is being built or
/// delivered are not reported again.
pub fn install_panic_hook(relay: Arc<ErrorRelay>, runtime: Handle) -> bool {
    if !relay.config().hijack_global_errors {
        return false;
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);

        if REPORTING_PANIC.try_with(|_| ()).is_ok() || IN_PANIC_HOOK.with(|flag| flag.replace(true)) {
            warn!("Panic raised while reporting a panic; not reported");
            return;
        }

        let failure = Failure::from_panic(info);
        let relay = Arc::clone(&relay);
        runtime.spawn(REPORTING_PANIC.scope((), async move {
            if let Err(e) = relay.on_error(failure).await {
                error!(error = %e, "Failed to report panic");
            }
        }));

        IN_PANIC_HOOK.with(|flag| flag.set(false));
    }));

    true
}
