//! Seam between the refresher and the chat platform.
//!
//! The refresher only sees the [`GuildPlatform`] trait; the production
//! implementation is [`discord::DiscordClient`], fed member presence by
//! [`gateway::track_presences`]; tests use `fake::FakePlatform`.

use async_trait::async_trait;

pub mod discord;
pub mod error;
#[cfg(test)]
pub mod fake;
pub mod gateway;

pub use discord::DiscordClient;
pub use error::{PlatformError, Result};
pub use gateway::PresenceBook;

/// Read-only view of a guild that the refresher needs.
#[async_trait]
pub trait GuildPlatform: Send + Sync {
    /// Verify the credentials and return the identity the client acts as.
    async fn connect(&self) -> Result<BotIdentity>;

    async fn fetch_guild(&self, guild_id: &str) -> Result<GuildInfo>;

    /// Every member of the guild, with presence when the platform provides it.
    async fn fetch_members(&self, guild_id: &str) -> Result<Vec<GuildMember>>;

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo>;

    /// One page of channel history, newest first, strictly older than `before`.
    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: String,
    /// `name#discriminator`, or just the name for accounts without one.
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
    /// Member count as reported by the platform, bots included.
    pub member_count: u64,
    /// Platform-side count of members that are not offline, if reported.
    pub approximate_presence_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Idle,
    DoNotDisturb,
    Offline,
}

impl PresenceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "online" => Self::Online,
            "idle" => Self::Idle,
            "dnd" => Self::DoNotDisturb,
            _ => Self::Offline,
        }
    }

    pub fn is_offline(self) -> bool {
        self == Self::Offline
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMember {
    pub user_id: String,
    /// Guild nickname, global display name or username, whichever is set first.
    pub display_name: String,
    /// CDN URL of the member's custom avatar; `None` when the default avatar is in use.
    pub avatar_url: Option<String>,
    pub bot: bool,
    /// `None` when the platform did not report presence for this member.
    pub presence: Option<PresenceStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Voice,
    Announcement,
    Thread,
    Stage,
    Category,
    Forum,
    Other,
}

impl ChannelKind {
    /// Discord channel type codes.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Text,
            2 => Self::Voice,
            4 => Self::Category,
            5 => Self::Announcement,
            10..=12 => Self::Thread,
            13 => Self::Stage,
            15 | 16 => Self::Forum,
            _ => Self::Other,
        }
    }

    /// Whether the channel has its own message history.
    pub fn has_messages(self) -> bool {
        matches!(
            self,
            Self::Text | Self::Voice | Self::Announcement | Self::Thread | Self::Stage
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: Option<String>,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}
