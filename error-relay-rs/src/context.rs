//! # Origin Context Extraction
//!
//! Turns whatever raised a failure (a prefix command, an interaction, or
//! nothing at all) into an immutable [`ContextPacket`] describing who
//! triggered it, where, and when.

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::failure::Failure;

/// Platform identifier for users, guilds and channels
pub type Snowflake = u64;

/// A resolved command, identified by its fully qualified name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRef {
    pub qualified_name: String,
}

impl CommandRef {
    pub fn new<S: Into<String>>(qualified_name: S) -> Self {
        Self { qualified_name: qualified_name.into() }
    }
}

/// A UI component and the view it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    pub component: String,
    pub view: String,
}

/// What failed: a command, or a UI component callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Command(CommandRef),
    Component(ComponentRef),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Command(command) => write!(f, "command \"{}\"", command.qualified_name),
            Origin::Component(item) => write!(f, "Item {} of view {}", item.component, item.view),
        }
    }
}

/// Where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
}

/// A prefix-command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub author_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub channel_id: Snowflake,
    pub command: Option<CommandRef>,
    /// Creation time of the message that invoked the command
    pub message_created_at: Option<DateTime<Utc>>,
}

/// An application-command or component interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionContext {
    pub user_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub origin: Option<Origin>,
    /// Creation time of the message the interaction is attached to, if any
    pub message_created_at: Option<DateTime<Utc>>,
}

/// The event a failure was raised from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginContext {
    Command(CommandContext),
    Interaction(InteractionContext),
}

/// One recorded occurrence of a failure
#[derive(Debug, Clone)]
pub struct ContextPacket {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub failure: Failure,
    pub actor: Option<Snowflake>,
    pub scope: Option<Scope>,
    pub origin: Option<Origin>,
}

/// Builds the packet for one failure.
///
/// `captured_at` is used whenever the context carries no message timestamp.
pub fn extract(
    failure: Failure,
    origin: Option<&OriginContext>,
    captured_at: DateTime<Utc>,
) -> ContextPacket {
    let (time, actor, scope, origin) = match origin {
        Some(OriginContext::Command(ctx)) => (
            ctx.message_created_at.unwrap_or(captured_at),
            Some(ctx.author_id),
            Some(Scope { guild_id: ctx.guild_id, channel_id: Some(ctx.channel_id) }),
            ctx.command.clone().map(Origin::Command),
        ),
        Some(OriginContext::Interaction(ctx)) => (
            ctx.message_created_at.unwrap_or(captured_at),
            Some(ctx.user_id),
            Some(Scope { guild_id: ctx.guild_id, channel_id: ctx.channel_id }),
            ctx.origin.clone(),
        ),
        None => (captured_at, None, None, None),
    };

    ContextPacket {
        id: Uuid::new_v4(),
        time,
        failure,
        actor,
        scope,
        origin,
    }
}
