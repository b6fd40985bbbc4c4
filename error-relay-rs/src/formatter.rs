//! # Report Formatting
//!
//! Pure rendering of a signature and its packet into webhook messages: a
//! primary embed with title, timestamp and a metadata field, followed by the
//! rest of the trace split into code-block embeds and batched to the sink's
//! per-message embed limit.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};
use crate::aggregator::FailureSignature;
use crate::context::{ContextPacket, Origin, Snowflake};

/// Characters per message the sink accepts in a description
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Embeds the sink accepts per message
pub const DEFAULT_BATCH_LIMIT: usize = 10;

/// A user as the host can display it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Snowflake,
    /// Full display form, e.g. `name#0001`
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: Snowflake,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: Snowflake,
    pub name: String,
}

/// The identity the host application posts as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    /// Full name used for the embed author block
    pub name: String,
    /// Name used for the webhook username override
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Lookups into the host application's cache.
///
/// Every method may return `None`; the formatter degrades gracefully.
pub trait EntityResolver: Send + Sync {
    fn guild(&self, guild_id: Snowflake) -> Option<GuildInfo>;

    fn channel(&self, guild: &GuildInfo, channel_id: Snowflake) -> Option<ChannelInfo>;

    fn member(&self, guild: &GuildInfo, user_id: Snowflake) -> Option<UserInfo>;

    fn user(&self, user_id: Snowflake) -> Option<UserInfo>;

    fn bot_identity(&self) -> Option<BotIdentity>;

    /// Name of the host application, used when a failure has no origin
    fn host_name(&self) -> String;
}

/// Resolver for hosts without any cache: nothing resolves
#[derive(Debug, Clone)]
pub struct NoopResolver {
    pub host_name: String,
}

impl Default for NoopResolver {
    fn default() -> Self {
        Self { host_name: env!("CARGO_PKG_NAME").to_string() }
    }
}

impl EntityResolver for NoopResolver {
    fn guild(&self, _guild_id: Snowflake) -> Option<GuildInfo> {
        None
    }

    fn channel(&self, _guild: &GuildInfo, _channel_id: Snowflake) -> Option<ChannelInfo> {
        None
    }

    fn member(&self, _guild: &GuildInfo, _user_id: Snowflake) -> Option<UserInfo> {
        None
    }

    fn user(&self, _user_id: Snowflake) -> Option<UserInfo> {
        None
    }

    fn bot_identity(&self) -> Option<BotIdentity> {
        None
    }

    fn host_name(&self) -> String {
        self.host_name.clone()
    }
}

/// Body of one webhook execute call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// Rendering knobs, taken from the relay configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSettings {
    pub chunk_size: usize,
    pub batch_limit: usize,
    pub code_language: String,
    pub mention: Option<String>,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_limit: DEFAULT_BATCH_LIMIT,
            code_language: "rs".to_string(),
            mention: None,
        }
    }
}

impl FormatSettings {
    /// Characters the code-block wrapper adds around each chunk
    pub fn code_block_overhead(&self) -> usize {
        // "```" + lang + "\n" + "```"
        3 + self.code_language.chars().count() + 1 + 3
    }

    /// Trace characters that fit into one chunk
    pub fn chunk_budget(&self) -> usize {
        self.chunk_size.saturating_sub(self.code_block_overhead())
    }

    fn code_block(&self, body: &str) -> String {
        format!("```{}\n{}```", self.code_language, body)
    }
}

/// Splits `trace` into code blocks that each fit within `chunk_size`.
///
/// Produces `ceil(len / chunk_budget)` blocks; an empty trace still yields
/// one empty block so the primary embed always has a description.
pub fn chunk_code(trace: &str, settings: &FormatSettings) -> Vec<String> {
    let budget = settings.chunk_budget().max(1);
    let chars: Vec<char> = trace.chars().collect();

    if chars.is_empty() {
        return vec![settings.code_block("")];
    }

    chars
        .chunks(budget)
        .map(|piece| settings.code_block(&piece.iter().collect::<String>()))
        .collect()
}

/// Discord-style timestamp markup
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    format!("<t:{}>", time.timestamp())
}

/// Ordered `(label, value)` metadata lines for a packet
pub fn metadata(packet: &ContextPacket, resolver: &dyn EntityResolver) -> Vec<(&'static str, String)> {
    let mut lines = vec![("Time", format_timestamp(packet.time))];
    let mut author = packet.actor.map(|id| format!("<@{}>", id));
    let mut author_resolved = false;

    let guild = match packet.scope.and_then(|s| s.guild_id) {
        Some(guild_id) => {
            let guild = resolver.guild(guild_id);
            if guild.is_none() {
                warn!(guild_id, packet_id = %packet.id, "Ignoring error packet with unknown guild id");
            }
            guild
        }
        None => {
            debug!(packet_id = %packet.id, "Error packet has no guild scope");
            None
        }
    };

    let mut channel_line = None;
    if let Some(guild) = &guild {
        if let Some(channel) = packet
            .scope
            .and_then(|s| s.channel_id)
            .and_then(|id| resolver.channel(guild, id))
        {
            channel_line = Some(format!("{} - <#{}> - ({})", channel.name, channel.id, channel.id));
        }

        if let Some(user) = packet.actor.and_then(|id| resolver.member(guild, id)) {
            author = Some(format!("{} - <@{}> ({})", user.display, user.id, user.id));
            author_resolved = true;
        }
    }

    if let Some(actor) = packet.actor.filter(|_| !author_resolved) {
        author = Some(match resolver.user(actor) {
            Some(user) => format!("{} - <@{}> ({})", user.display, user.id, user.id),
            None => format!("<Unknown User> - <@{}> ({})", actor, actor),
        });
    }

    if let Some(author) = author {
        lines.push(("Author", author));
    }
    if let Some(guild) = &guild {
        lines.push(("Guild", format!("{} ({})", guild.name, guild.id)));
    }
    if let Some(channel) = channel_line {
        lines.push(("Channel", channel));
    }
    if let Some(Origin::Command(command)) = &packet.origin {
        lines.push(("Command", command.qualified_name.clone()));
    }

    lines
}

/// Title describing where the failure happened
pub fn title(packet: &ContextPacket, resolver: &dyn EntityResolver) -> String {
    let display = match &packet.origin {
        Some(origin) => origin.to_string(),
        None => format!("no command ({})", resolver.host_name()),
    };
    format!("An error has occurred in {}", display)
}

/// Renders the full report: the primary message, then one message per batch
/// of overflow chunks.
pub fn render_report(
    signature: &FailureSignature,
    packet: &ContextPacket,
    resolver: &dyn EntityResolver,
    settings: &FormatSettings,
) -> Vec<WebhookMessage> {
    let identity = resolver.bot_identity();
    let author = identity.as_ref().map(|bot| EmbedAuthor {
        name: bot.name.clone(),
        icon_url: bot.avatar_url.clone(),
    });
    let message = |embeds: Vec<Embed>| WebhookMessage {
        content: settings.mention.clone(),
        embeds,
        username: identity.as_ref().map(|bot| bot.display_name.clone()),
        avatar_url: identity.as_ref().and_then(|bot| bot.avatar_url.clone()),
    };

    let mut chunks = chunk_code(signature.as_str(), settings).into_iter();
    let metadata = metadata(packet, resolver)
        .into_iter()
        .map(|(k, v)| format!("**{}**: {}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let primary = Embed {
        title: Some(title(packet, resolver)),
        description: chunks.next(),
        timestamp: Some(packet.time),
        fields: vec![EmbedField { name: "Metadata".to_string(), value: metadata, inline: true }],
        author: author.clone(),
    };

    let mut messages = vec![message(vec![primary])];
    let overflow: Vec<Embed> = chunks
        .map(|chunk| Embed {
            description: Some(chunk),
            author: author.clone(),
            ..Embed::default()
        })
        .collect();

    for batch in overflow.chunks(settings.batch_limit.max(1)) {
        messages.push(message(batch.to_vec()));
    }

    messages
}
