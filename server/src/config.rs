use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

/// Smallest and largest number of sample members shown by the widget.
pub const SAMPLE_SIZE_MIN: usize = 3;
pub const SAMPLE_SIZE_MAX: usize = 6;

/// Longest accepted refresh interval: one day.
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 86_400;

/// Top-level service configuration, loaded from guildstat.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub discord: DiscordSection,
    pub refresh: RefreshSection,
    pub rate_limit: RateLimitSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiscordSection {
    /// Bot token used to authorize every platform call.
    pub token: Option<String>,
    pub guild_id: Option<String>,
    /// Accepted for deployments that set it; nothing reads it yet.
    pub status_channel_id: Option<String>,
    /// Channels scanned for photo and video attachments, in scan order.
    pub media_channel_ids: Vec<String>,
    pub api_base_url: String,
    /// Track member presence over the gateway. Needs the privileged
    /// presence and members intents; without it the guild estimate is used.
    pub presence_gateway: bool,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            token: None,
            guild_id: None,
            status_channel_id: None,
            media_channel_ids: Vec::new(),
            api_base_url: "https://discord.com/api/v10".into(),
            presence_gateway: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RefreshSection {
    pub interval_secs: u64,
    pub sample_size: usize,
    pub max_photos: usize,
    pub max_videos: usize,
    pub pages_per_channel: usize,
    pub page_size: u8,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            sample_size: SAMPLE_SIZE_MAX,
            max_photos: 120,
            max_videos: 60,
            pages_per_channel: 3,
            page_size: 50,
        }
    }
}

impl RefreshSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Burst capacity per client IP.
    pub burst: u32,
    /// Refill one request every N seconds.
    pub per_seconds: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            burst: 60,
            per_seconds: 1.0,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.clamp_sample_size();
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("TOKEN").or_else(|| var("DISCORD_TOKEN")) {
            self.discord.token = Some(v);
        }
        if let Some(v) = var("GUILD_ID") {
            self.discord.guild_id = Some(v);
        }
        if let Some(v) = var("STATUS_CHANNEL_ID") {
            self.discord.status_channel_id = Some(v);
        }
        if let Some(v) = var("MEDIA_CHANNEL_IDS") {
            self.discord.media_channel_ids = parse_id_list(&v);
        }
        if let Some(v) = var("DISCORD_API_URL") {
            self.discord.api_base_url = v;
        }
        if let Some(v) = var("PRESENCE_GATEWAY")
            && let Some(enabled) = parse_flag(&v)
        {
            self.discord.presence_gateway = enabled;
        }
        if let Some(v) = var("BIND_HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("PORT")
            && let Ok(port) = v.trim().parse()
        {
            self.server.port = port;
        }
        if let Some(v) = var("REFRESH_INTERVAL_SECS")
            && let Ok(secs) = v.trim().parse()
        {
            self.refresh.interval_secs = secs;
        }
        if let Some(v) = var("SAMPLE_SIZE")
            && let Ok(n) = v.trim().parse()
        {
            self.refresh.sample_size = n;
        }
        if let Some(v) = var("MAX_PHOTOS")
            && let Ok(n) = v.trim().parse()
        {
            self.refresh.max_photos = n;
        }
        if let Some(v) = var("MAX_VIDEOS")
            && let Ok(n) = v.trim().parse()
        {
            self.refresh.max_videos = n;
        }
        if let Some(v) = var("PAGES_PER_CHANNEL")
            && let Ok(n) = v.trim().parse()
        {
            self.refresh.pages_per_channel = n;
        }

        // Blank values count as unset.
        if self.discord.guild_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.discord.guild_id = None;
        }
        if self
            .discord
            .status_channel_id
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            self.discord.status_channel_id = None;
        }
    }

    fn clamp_sample_size(&mut self) {
        let clamped = self
            .refresh
            .sample_size
            .clamp(SAMPLE_SIZE_MIN, SAMPLE_SIZE_MAX);
        if clamped != self.refresh.sample_size {
            warn!(
                requested = self.refresh.sample_size,
                used = clamped,
                "sample_size out of range, clamping"
            );
            self.refresh.sample_size = clamped;
        }
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        let Some(token) = self.discord.token.as_deref() else {
            bail!("bot token is not set (TOKEN)");
        };
        if !is_well_formed_token(token) {
            bail!("bot token is malformed (expected three dot-separated segments)");
        }
        if self.server.port == 0 {
            bail!("HTTP port must be non-zero");
        }
        if !(1..=MAX_REFRESH_INTERVAL_SECS).contains(&self.refresh.interval_secs) {
            bail!("refresh interval must be within 1..={MAX_REFRESH_INTERVAL_SECS} seconds");
        }
        if self.refresh.page_size == 0 || self.refresh.page_size > 100 {
            bail!("page_size must be within 1..=100");
        }
        let per_seconds = self.rate_limit.per_seconds;
        if self.rate_limit.burst == 0 || !per_seconds.is_finite() || per_seconds <= 0.0 {
            bail!("rate limit burst and per_seconds must be positive and finite");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Split a comma-separated id list, dropping blanks.
pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Bot tokens are three non-empty, dot-separated segments with no whitespace.
fn is_well_formed_token(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments
            .iter()
            .all(|s| !s.is_empty() && !s.chars().any(char::is_whitespace))
}
