//! Scripted in-memory platform for tests.
//!
//! Configure guilds, members and channel histories with the builder methods,
//! then hand the fake to a `Refresher`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::error::{PlatformError, Result};
use super::{
    Attachment, BotIdentity, ChannelInfo, ChannelKind, ChannelMessage, GuildInfo, GuildMember,
    GuildPlatform, PresenceStatus,
};

#[derive(Default)]
pub struct FakePlatform {
    guild: Mutex<Option<GuildInfo>>,
    members: Mutex<Vec<GuildMember>>,
    /// Channel id -> (kind, full history newest first).
    channels: Mutex<HashMap<String, (ChannelKind, Vec<ChannelMessage>)>>,
    /// Channels whose history fetch fails.
    broken_history: Mutex<HashSet<String>>,
    fail_members: Mutex<bool>,
    /// Calls to `fetch_messages`, for pagination assertions.
    pub message_page_calls: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guild(self, member_count: u64, approximate_presence_count: Option<u64>) -> Self {
        *self.guild.lock().unwrap() = Some(GuildInfo {
            id: "guild-1".into(),
            name: "Test Guild".into(),
            member_count,
            approximate_presence_count,
        });
        self
    }

    pub fn with_members(self, members: Vec<GuildMember>) -> Self {
        *self.members.lock().unwrap() = members;
        self
    }

    pub fn with_channel(self, id: &str, kind: ChannelKind, history: Vec<ChannelMessage>) -> Self {
        self.channels
            .lock()
            .unwrap()
            .insert(id.to_string(), (kind, history));
        self
    }

    pub fn with_broken_history(self, id: &str) -> Self {
        self.broken_history.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn with_failing_members(self) -> Self {
        *self.fail_members.lock().unwrap() = true;
        self
    }

    /// Make the guild unreachable from now on.
    pub fn remove_guild(&self) {
        *self.guild.lock().unwrap() = None;
    }

    /// Replace a channel's history, e.g. to simulate an emptied channel.
    pub fn set_history(&self, id: &str, history: Vec<ChannelMessage>) {
        if let Some(entry) = self.channels.lock().unwrap().get_mut(id) {
            entry.1 = history;
        }
    }

    pub fn page_calls(&self) -> usize {
        self.message_page_calls.load(Ordering::SeqCst)
    }
}

// ── Fixture helpers ─────────────────────────────────────────────────

pub fn member(id: &str, bot: bool, avatar: bool, presence: Option<PresenceStatus>) -> GuildMember {
    GuildMember {
        user_id: id.to_string(),
        display_name: format!("user-{id}"),
        avatar_url: avatar.then(|| format!("https://cdn.example/avatars/{id}.png")),
        bot,
        presence,
    }
}

pub fn message(id: u64, urls: &[&str]) -> ChannelMessage {
    ChannelMessage {
        id: id.to_string(),
        attachments: urls
            .iter()
            .map(|url| Attachment {
                filename: url
                    .rsplit('/')
                    .next()
                    .and_then(|f| f.split('?').next())
                    .unwrap_or_default()
                    .to_string(),
                url: url.to_string(),
            })
            .collect(),
    }
}

/// `count` messages, newest first, each with one attachment built by `url_for(i)`.
pub fn history(count: usize, url_for: impl Fn(usize) -> String) -> Vec<ChannelMessage> {
    (0..count)
        .map(|i| {
            let url = url_for(i);
            message((10_000 - i) as u64, &[url.as_str()])
        })
        .collect()
}

#[async_trait]
impl GuildPlatform for FakePlatform {
    async fn connect(&self) -> Result<BotIdentity> {
        Ok(BotIdentity {
            id: "bot-1".into(),
            tag: "widgetbot".into(),
        })
    }

    async fn fetch_guild(&self, guild_id: &str) -> Result<GuildInfo> {
        self.guild
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PlatformError::NotFound(format!("guild {guild_id}")))
    }

    async fn fetch_members(&self, _guild_id: &str) -> Result<Vec<GuildMember>> {
        if *self.fail_members.lock().unwrap() {
            return Err(PlatformError::Forbidden("members intent disabled".into()));
        }
        Ok(self.members.lock().unwrap().clone())
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.channels
            .lock()
            .unwrap()
            .get(channel_id)
            .map(|(kind, _)| ChannelInfo {
                name: None,
                kind: *kind,
            })
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel_id}")))
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>> {
        self.message_page_calls.fetch_add(1, Ordering::SeqCst);

        if self.broken_history.lock().unwrap().contains(channel_id) {
            return Err(PlatformError::Server("history unavailable".into()));
        }

        let channels = self.channels.lock().unwrap();
        let (_, history) = channels
            .get(channel_id)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel_id}")))?;

        let start = match before {
            Some(cursor) => history
                .iter()
                .position(|m| m.id == cursor)
                .map(|i| i + 1)
                .unwrap_or(history.len()),
            None => 0,
        };

        Ok(history
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
