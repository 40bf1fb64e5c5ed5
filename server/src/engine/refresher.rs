use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::media::{ScanLimits, scan_channels};
use super::members::summarize;
use super::snapshot::{Snapshot, StatusCache};
use crate::config::ServerConfig;
use crate::platform::{GuildPlatform, PlatformError};

/// Retry policy of the refresh loop: a cycle runs every `period`, whether the
/// previous one failed or not. There is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval {
    pub period: Duration,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub guild_id: Option<String>,
    pub media_channel_ids: Vec<String>,
    pub sample_size: usize,
    pub max_photos: usize,
    pub max_videos: usize,
    pub limits: ScanLimits,
    pub schedule: FixedInterval,
}

impl RefreshSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            guild_id: config.discord.guild_id.clone(),
            media_channel_ids: config.discord.media_channel_ids.clone(),
            sample_size: config.refresh.sample_size,
            max_photos: config.refresh.max_photos,
            max_videos: config.refresh.max_videos,
            limits: ScanLimits {
                page_size: config.refresh.page_size,
                pages_per_channel: config.refresh.pages_per_channel,
            },
            schedule: FixedInterval {
                period: config.refresh.interval(),
            },
        }
    }
}

/// Why a cycle was abandoned before publishing.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("guild id is not configured")]
    GuildNotConfigured,

    #[error("failed to fetch guild: {0}")]
    Guild(#[source] PlatformError),

    #[error("failed to fetch guild members: {0}")]
    Members(#[source] PlatformError),
}

#[derive(Debug)]
pub enum CycleOutcome {
    Published,
    Failed(RefreshError),
    /// Another cycle was still running.
    Skipped,
}

/// Builds snapshots from the platform and publishes them to the cache.
pub struct Refresher {
    platform: Arc<dyn GuildPlatform>,
    cache: Arc<StatusCache>,
    settings: RefreshSettings,
    in_flight: Mutex<()>,
    cycles: AtomicU64,
}

impl Refresher {
    pub fn new(
        platform: Arc<dyn GuildPlatform>,
        cache: Arc<StatusCache>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            platform,
            cache,
            settings,
            in_flight: Mutex::new(()),
            cycles: AtomicU64::new(0),
        }
    }

    /// Run one cycle. Errors are logged, never returned; a failed cycle leaves
    /// the cache exactly as it was.
    pub async fn refresh(&self) -> CycleOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("previous refresh still running, skipping this one");
            return CycleOutcome::Skipped;
        };
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        match self.build_snapshot().await {
            Ok(snapshot) => {
                let total = snapshot.total_members;
                let online = snapshot.online_members;
                let photos = snapshot.photos.len();
                let videos = snapshot.videos.len();
                self.cache.publish(snapshot, Utc::now());
                info!(cycle, total, online, photos, videos, "snapshot refreshed");
                CycleOutcome::Published
            }
            Err(e) => {
                error!(cycle, error = %e, "refresh cycle failed");
                CycleOutcome::Failed(e)
            }
        }
    }

    async fn build_snapshot(&self) -> Result<Snapshot, RefreshError> {
        let guild_id = self
            .settings
            .guild_id
            .as_deref()
            .ok_or(RefreshError::GuildNotConfigured)?;

        let guild = self
            .platform
            .fetch_guild(guild_id)
            .await
            .map_err(RefreshError::Guild)?;
        let members = self
            .platform
            .fetch_members(guild_id)
            .await
            .map_err(RefreshError::Members)?;

        let stats = summarize(&guild, &members, self.settings.sample_size);
        info!(
            guild = %guild.name,
            total = stats.total_members,
            online = stats.online_members,
            source = ?stats.online_source,
            "member pass complete"
        );

        let mut media = scan_channels(
            self.platform.as_ref(),
            &self.settings.media_channel_ids,
            self.settings.limits,
        )
        .await;
        media.truncate(self.settings.max_photos, self.settings.max_videos);
        info!(
            scanned = media.channels_scanned,
            skipped = media.channels_skipped,
            photos = media.photos.len(),
            videos = media.videos.len(),
            "media pass complete"
        );

        // An empty scan does not wipe media cached by an earlier cycle.
        let previous = self.cache.current();
        let photos = match &previous {
            Some(prev) if media.photos.is_empty() => prev.snapshot.photos.clone(),
            _ => media.photos,
        };
        let videos = match &previous {
            Some(prev) if media.videos.is_empty() => prev.snapshot.videos.clone(),
            _ => media.videos,
        };

        Ok(Snapshot {
            total_members: stats.total_members,
            online_members: stats.online_members,
            sample_members: stats.sample_members,
            photos,
            videos,
        })
    }

    /// Repeat `refresh` on the fixed schedule until cancelled. The first tick
    /// fires one period from now; the startup cycle runs before this loop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.settings.schedule.period;
        let Some(first_tick) = Instant::now().checked_add(period) else {
            error!(period_secs = period.as_secs(), "refresh period out of range, loop not started");
            return;
        };
        let mut ticker = tokio::time::interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period_secs = period.as_secs(), "refresh loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("refresh loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }
    }
}
