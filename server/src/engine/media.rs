use reqwest::Url;
use tracing::{debug, error, warn};

use super::snapshot::MediaItem;
use crate::platform::{Attachment, GuildPlatform, PlatformError};

const PHOTO_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    fn fallback_title(self) -> &'static str {
        match self {
            Self::Photo => "Photo",
            Self::Video => "Video",
        }
    }
}

/// Classify an attachment URL by the extension of its path, ignoring case,
/// query string and fragment.
pub fn classify(url: &str) -> Option<MediaKind> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let file = path.rsplit('/').next().unwrap_or_default();
    let (_, ext) = file.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();

    if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

fn media_item(attachment: &Attachment, kind: MediaKind) -> MediaItem {
    let title = if attachment.filename.trim().is_empty() {
        kind.fallback_title().to_string()
    } else {
        attachment.filename.clone()
    };
    MediaItem {
        title,
        url: attachment.url.clone(),
    }
}

/// History window inspected per channel.
#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub page_size: u8,
    pub pages_per_channel: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            page_size: 50,
            pages_per_channel: 3,
        }
    }
}

/// Media gathered in discovery order: channels in configured order, newest message first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MediaScan {
    pub photos: Vec<MediaItem>,
    pub videos: Vec<MediaItem>,
    pub channels_scanned: usize,
    pub channels_skipped: usize,
}

impl MediaScan {
    fn push(&mut self, attachment: &Attachment) {
        match classify(&attachment.url) {
            Some(kind @ MediaKind::Photo) => self.photos.push(media_item(attachment, kind)),
            Some(kind @ MediaKind::Video) => self.videos.push(media_item(attachment, kind)),
            None => {}
        }
    }

    pub fn truncate(&mut self, max_photos: usize, max_videos: usize) {
        self.photos.truncate(max_photos);
        self.videos.truncate(max_videos);
    }
}

/// Walk a channel's recent history and collect its media.
///
/// Fails only when the channel itself cannot be used; a failing page ends the
/// walk but keeps what earlier pages produced.
async fn scan_channel<P: GuildPlatform + ?Sized>(
    platform: &P,
    channel_id: &str,
    limits: ScanLimits,
    scan: &mut MediaScan,
) -> Result<(), PlatformError> {
    let channel = platform.fetch_channel(channel_id).await?;
    let name = channel.name.as_deref().unwrap_or("unnamed");
    if !channel.kind.has_messages() {
        return Err(PlatformError::InvalidResponse(format!(
            "channel {channel_id} ({name}) is {:?}, which has no message history",
            channel.kind
        )));
    }
    debug!(%channel_id, channel = name, "scanning channel history");

    let mut before: Option<String> = None;
    for page_number in 0..limits.pages_per_channel {
        let page = match platform
            .fetch_messages(channel_id, before.as_deref(), limits.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(%channel_id, page = page_number, error = %e, "failed to fetch message page");
                break;
            }
        };

        for message in &page {
            for attachment in &message.attachments {
                scan.push(attachment);
            }
        }

        if page.len() < limits.page_size as usize {
            break;
        }
        before = page.last().map(|m| m.id.clone());
    }

    Ok(())
}

/// Media pass over every configured channel. Per-channel failures are logged and skipped.
pub async fn scan_channels<P: GuildPlatform + ?Sized>(
    platform: &P,
    channel_ids: &[String],
    limits: ScanLimits,
) -> MediaScan {
    let mut scan = MediaScan::default();

    for channel_id in channel_ids {
        let photos_before = scan.photos.len();
        let videos_before = scan.videos.len();

        match scan_channel(platform, channel_id, limits, &mut scan).await {
            Ok(()) => {
                scan.channels_scanned += 1;
                debug!(
                    %channel_id,
                    photos = scan.photos.len() - photos_before,
                    videos = scan.videos.len() - videos_before,
                    "scanned channel"
                );
            }
            Err(e) => {
                scan.channels_skipped += 1;
                error!(%channel_id, error = %e, "skipping media channel");
            }
        }
    }

    scan
}
