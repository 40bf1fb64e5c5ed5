//! Member presence over the Discord gateway.
//!
//! REST never reports presence, so one shard with the guild presence intent
//! keeps a [`PresenceBook`] current: a full member-chunk sync after every
//! guild create, then individual presence updates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use twilight_gateway::{Event, EventTypeFlags, Intents, Shard, ShardId, StreamExt as _};
use twilight_model::gateway::payload::outgoing::RequestGuildMembers;
use twilight_model::gateway::presence::{Presence, Status, UserOrId};
use twilight_model::id::Id;
use twilight_model::id::marker::GuildMarker;

use super::PresenceStatus;

/// Presence of one guild's members, keyed by user id.
///
/// Only members that are not offline are stored. Until a full sync has
/// completed nothing is known and lookups return `None`.
#[derive(Default)]
pub struct PresenceBook {
    state: RwLock<BookState>,
}

#[derive(Default)]
struct BookState {
    present: HashMap<String, PresenceStatus>,
    synced: bool,
    /// Chunks of a sync in progress; `present` keeps serving until it completes.
    pending: Option<HashMap<String, PresenceStatus>>,
}

impl PresenceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presence of `user_id`, or `None` before the first full sync.
    pub fn status_of(&self, user_id: &str) -> Option<PresenceStatus> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        if !state.synced {
            return None;
        }
        Some(
            state
                .present
                .get(user_id)
                .copied()
                .unwrap_or(PresenceStatus::Offline),
        )
    }

    pub fn is_synced(&self) -> bool {
        self.state.read().unwrap_or_else(|p| p.into_inner()).synced
    }

    /// Members currently known not to be offline.
    pub fn present_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .present
            .len()
    }

    /// Fold one member chunk into the running sync. `first` starts a new sync,
    /// `last` makes it the served state.
    pub fn record_chunk(
        &self,
        entries: impl IntoIterator<Item = (String, PresenceStatus)>,
        first: bool,
        last: bool,
    ) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if first || state.pending.is_none() {
            state.pending = Some(HashMap::new());
        }
        if let Some(pending) = state.pending.as_mut() {
            for (user_id, status) in entries {
                if !status.is_offline() {
                    pending.insert(user_id, status);
                }
            }
        }
        if last && let Some(complete) = state.pending.take() {
            state.present = complete;
            state.synced = true;
        }
    }

    /// Apply a single presence change to the served state and to any sync in progress.
    pub fn update(&self, user_id: String, status: PresenceStatus) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if let Some(pending) = state.pending.as_mut() {
            apply(pending, user_id.clone(), status);
        }
        apply(&mut state.present, user_id, status);
    }

    /// Forget everything; lookups return `None` until the next full sync.
    pub fn mark_stale(&self) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        *state = BookState::default();
    }
}

fn apply(map: &mut HashMap<String, PresenceStatus>, user_id: String, status: PresenceStatus) {
    if status.is_offline() {
        map.remove(&user_id);
    } else {
        map.insert(user_id, status);
    }
}

/// Invisible members look offline to everyone else.
fn map_status(status: Status) -> PresenceStatus {
    match status {
        Status::Online => PresenceStatus::Online,
        Status::Idle => PresenceStatus::Idle,
        Status::DoNotDisturb => PresenceStatus::DoNotDisturb,
        _ => PresenceStatus::Offline,
    }
}

fn presence_entry(presence: &Presence) -> (String, PresenceStatus) {
    let user_id = match &presence.user {
        UserOrId::User(user) => user.id.to_string(),
        UserOrId::UserId { id } => id.to_string(),
    };
    (user_id, map_status(presence.status))
}

/// Keep `book` current for `guild_id` until cancelled or the gateway closes
/// for good. The book is marked stale on exit.
pub async fn track_presences(
    token: String,
    guild_id: Id<GuildMarker>,
    book: Arc<PresenceBook>,
    cancel: CancellationToken,
) {
    let intents = Intents::GUILDS | Intents::GUILD_MEMBERS | Intents::GUILD_PRESENCES;
    let mut shard = Shard::new(ShardId::ONE, token, intents);
    info!(%guild_id, "presence gateway connecting");

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                info!("presence gateway shutting down");
                break;
            }
            item = shard.next_event(EventTypeFlags::all()) => item,
        };

        let Some(item) = item else {
            error!("presence gateway closed, online counts fall back to the guild estimate");
            break;
        };

        match item {
            Ok(event) => handle_event(&shard, guild_id, &book, event),
            Err(e) => warn!(error = %e, "presence gateway receive error"),
        }
    }

    book.mark_stale();
}

fn handle_event(shard: &Shard, guild_id: Id<GuildMarker>, book: &PresenceBook, event: Event) {
    let for_guild = event.guild_id() == Some(guild_id);

    match event {
        Event::Ready(_) => info!("presence gateway ready"),
        Event::GuildCreate(_) if for_guild => {
            let request = RequestGuildMembers::builder(guild_id)
                .presences(true)
                .query("", None);
            match shard.sender().command(&request) {
                Ok(()) => debug!(%guild_id, "requested member presences"),
                Err(e) => warn!(%guild_id, error = %e, "failed to request member presences"),
            }
        }
        Event::MemberChunk(chunk) if for_guild => {
            let last = chunk.chunk_index + 1 >= chunk.chunk_count;
            book.record_chunk(
                chunk.presences.iter().map(presence_entry),
                chunk.chunk_index == 0,
                last,
            );
            if last {
                info!(present = book.present_count(), "member presence sync complete");
            }
        }
        Event::PresenceUpdate(update) if for_guild => {
            let (user_id, status) = presence_entry(&update.0);
            book.update(user_id, status);
        }
        _ => {}
    }
}
