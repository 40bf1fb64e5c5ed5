//! Discord REST implementation of [`GuildPlatform`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::{PlatformError, Result};
use super::gateway::PresenceBook;
use super::{
    Attachment, BotIdentity, ChannelInfo, ChannelKind, ChannelMessage, GuildInfo, GuildMember,
    GuildPlatform,
};

const CDN_BASE_URL: &str = "https://cdn.discordapp.com";

/// Largest page the member list endpoint serves.
const MEMBER_PAGE_SIZE: usize = 1000;

/// Attempts per request when the platform answers 429.
const MAX_ATTEMPTS: u32 = 3;

/// Avatar edge length requested from the CDN.
const AVATAR_SIZE: u32 = 64;

pub struct DiscordClient {
    http: HttpClient,
    base_url: String,
    token: String,
    presences: Option<Arc<PresenceBook>>,
}

impl DiscordClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!(
                "DiscordBot (guildstat, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            presences: None,
        })
    }

    /// Attach gateway presence so member lookups carry per-member status.
    pub fn with_presences(mut self, book: Arc<PresenceBook>) -> Self {
        self.presences = Some(book);
        self
    }

    /// GET a JSON resource, waiting out 429 responses up to `MAX_ATTEMPTS` times.
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 1;

        loop {
            let response = self
                .http
                .get(&url)
                .query(query)
                .header("Authorization", format!("Bot {}", self.token))
                .send()
                .await?;

            let status = response.status();
            match status {
                s if s.is_success() => {
                    return response.json::<T>().await.map_err(|e| {
                        PlatformError::InvalidResponse(format!("{path}: {e}"))
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = retry_after(response).await;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(PlatformError::RateLimited(wait));
                    }
                    warn!(%path, attempt, wait_ms = wait.as_millis() as u64, "rate limited, waiting");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                StatusCode::UNAUTHORIZED => return Err(PlatformError::Unauthorized),
                StatusCode::FORBIDDEN => {
                    return Err(PlatformError::Forbidden(error_message(response, path).await));
                }
                StatusCode::NOT_FOUND => {
                    return Err(PlatformError::NotFound(error_message(response, path).await));
                }
                s if s.is_server_error() => {
                    return Err(PlatformError::Server(format!("{path} returned {s}")));
                }
                s => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(PlatformError::InvalidResponse(format!(
                        "{path} returned {s}: {body}"
                    )));
                }
            }
        }
    }
}

/// Wait duration from a 429 body (`retry_after`, seconds as float), else the header.
async fn retry_after(response: reqwest::Response) -> Duration {
    let header_secs = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok());

    let body_secs = response
        .json::<RateLimitBody>()
        .await
        .ok()
        .map(|b| b.retry_after);

    retry_wait(body_secs, header_secs)
}

/// Non-finite values (`NaN`, `inf`) are ignored; the result is capped at a minute.
fn retry_wait(body_secs: Option<f64>, header_secs: Option<f64>) -> Duration {
    let secs = body_secs
        .filter(|s| s.is_finite())
        .or(header_secs.filter(|s| s.is_finite()))
        .unwrap_or(1.0);
    Duration::from_secs_f64(secs.clamp(0.0, 60.0))
}

async fn error_message(response: reqwest::Response, path: &str) -> String {
    match response.json::<ErrorBody>().await {
        Ok(body) => format!("{path}: {}", body.message),
        Err(_) => path.to_string(),
    }
}

fn user_avatar_url(user_id: &str, hash: &str) -> String {
    format!("{CDN_BASE_URL}/avatars/{user_id}/{hash}.png?size={AVATAR_SIZE}")
}

fn guild_avatar_url(guild_id: &str, user_id: &str, hash: &str) -> String {
    format!("{CDN_BASE_URL}/guilds/{guild_id}/users/{user_id}/avatars/{hash}.png?size={AVATAR_SIZE}")
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct UserPayload {
    id: String,
    username: String,
    #[serde(default)]
    discriminator: Option<String>,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Deserialize)]
struct GuildPayload {
    id: String,
    name: String,
    #[serde(default)]
    approximate_member_count: Option<u64>,
    #[serde(default)]
    member_count: Option<u64>,
    #[serde(default)]
    approximate_presence_count: Option<u64>,
}

#[derive(Deserialize)]
struct MemberPayload {
    user: UserPayload,
    #[serde(default)]
    nick: Option<String>,
    /// Guild-specific avatar hash.
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct ChannelPayload {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct MessagePayload {
    id: String,
    #[serde(default)]
    attachments: Vec<AttachmentPayload>,
}

#[derive(Deserialize)]
struct AttachmentPayload {
    #[serde(default)]
    filename: String,
    url: String,
}

impl MemberPayload {
    fn into_member(self, guild_id: &str) -> GuildMember {
        let avatar_url = match (&self.avatar, &self.user.avatar) {
            (Some(hash), _) => Some(guild_avatar_url(guild_id, &self.user.id, hash)),
            (None, Some(hash)) => Some(user_avatar_url(&self.user.id, hash)),
            (None, None) => None,
        };
        let display_name = self
            .nick
            .or(self.user.global_name)
            .unwrap_or(self.user.username);

        GuildMember {
            user_id: self.user.id,
            display_name,
            avatar_url,
            bot: self.user.bot,
            // Filled from the gateway presence book, if any.
            presence: None,
        }
    }
}

#[async_trait]
impl GuildPlatform for DiscordClient {
    async fn connect(&self) -> Result<BotIdentity> {
        let user: UserPayload = self.get("/users/@me", &[]).await?;
        let tag = match user.discriminator.as_deref() {
            Some(d) if d != "0" => format!("{}#{}", user.username, d),
            _ => user.username,
        };
        Ok(BotIdentity { id: user.id, tag })
    }

    async fn fetch_guild(&self, guild_id: &str) -> Result<GuildInfo> {
        let guild: GuildPayload = self
            .get(
                &format!("/guilds/{guild_id}"),
                &[("with_counts", "true".to_string())],
            )
            .await?;

        let member_count = guild
            .approximate_member_count
            .or(guild.member_count)
            .ok_or_else(|| PlatformError::InvalidResponse("guild has no member count".into()))?;

        Ok(GuildInfo {
            id: guild.id,
            name: guild.name,
            member_count,
            approximate_presence_count: guild.approximate_presence_count,
        })
    }

    async fn fetch_members(&self, guild_id: &str) -> Result<Vec<GuildMember>> {
        let path = format!("/guilds/{guild_id}/members");
        let mut members = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("limit", MEMBER_PAGE_SIZE.to_string())];
            if let Some(ref id) = after {
                query.push(("after", id.clone()));
            }

            let page: Vec<MemberPayload> = self.get(&path, &query).await?;
            let page_len = page.len();
            after = page.last().map(|m| m.user.id.clone());
            members.extend(page.into_iter().map(|m| m.into_member(guild_id)));

            if page_len < MEMBER_PAGE_SIZE || after.is_none() {
                break;
            }
        }

        if let Some(book) = &self.presences {
            for member in &mut members {
                member.presence = book.status_of(&member.user_id);
            }
        }

        debug!(%guild_id, count = members.len(), "fetched guild members");
        Ok(members)
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        let channel: ChannelPayload = self.get(&format!("/channels/{channel_id}"), &[]).await?;
        Ok(ChannelInfo {
            name: channel.name,
            kind: ChannelKind::from_code(channel.kind),
        })
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }

        let page: Vec<MessagePayload> = self
            .get(&format!("/channels/{channel_id}/messages"), &query)
            .await?;

        Ok(page
            .into_iter()
            .map(|m| ChannelMessage {
                id: m.id,
                attachments: m
                    .attachments
                    .into_iter()
                    .map(|a| Attachment {
                        filename: a.filename,
                        url: a.url,
                    })
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformError, PresenceStatus};
    use mockito::Matcher;

    const TOKEN: &str = "MTA4.GhYx1a.abcDEF_123";

    #[tokio::test]
    async fn test_connect_sends_bot_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/@me")
            .match_header("authorization", format!("Bot {TOKEN}").as_str())
            .with_status(200)
            .with_body(r#"{"id": "42", "username": "widgetbot", "discriminator": "0"}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let me = client.connect().await.unwrap();
        assert_eq!(me.id, "42");
        assert_eq!(me.tag, "widgetbot");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_legacy_discriminator_tag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/@me")
            .with_status(200)
            .with_body(r#"{"id": "42", "username": "widgetbot", "discriminator": "1234"}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        assert_eq!(client.connect().await.unwrap().tag, "widgetbot#1234");
    }

    #[tokio::test]
    async fn test_connect_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/@me")
            .with_status(401)
            .with_body(r#"{"message": "401: Unauthorized", "code": 0}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, PlatformError::Unauthorized));
    }

    #[tokio::test]
    async fn test_fetch_guild_with_counts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/guilds/100")
            .match_query(Matcher::UrlEncoded("with_counts".into(), "true".into()))
            .with_status(200)
            .with_body(
                r#"{"id": "100", "name": "Test Guild",
                    "approximate_member_count": 14, "approximate_presence_count": 7}"#,
            )
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let guild = client.fetch_guild("100").await.unwrap();
        assert_eq!(guild.name, "Test Guild");
        assert_eq!(guild.member_count, 14);
        assert_eq!(guild.approximate_presence_count, Some(7));
    }

    #[tokio::test]
    async fn test_fetch_guild_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/guilds/404")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"message": "Unknown Guild", "code": 10004}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        match client.fetch_guild("404").await.unwrap_err() {
            PlatformError::NotFound(msg) => assert!(msg.contains("Unknown Guild")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_members_maps_names_and_avatars() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/guilds/100/members")
            .match_query(Matcher::UrlEncoded("limit".into(), "1000".into()))
            .with_status(200)
            .with_body(
                r#"[
                    {"user": {"id": "1", "username": "alice", "global_name": "Alice", "avatar": "a1"}, "nick": "Ally"},
                    {"user": {"id": "2", "username": "bob", "avatar": null}, "nick": null},
                    {"user": {"id": "3", "username": "carol", "avatar": "c1"}, "avatar": "g3"},
                    {"user": {"id": "4", "username": "robot", "avatar": "r1", "bot": true}}
                ]"#,
            )
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let members = client.fetch_members("100").await.unwrap();
        assert_eq!(members.len(), 4);

        assert_eq!(members[0].display_name, "Ally");
        assert_eq!(
            members[0].avatar_url.as_deref(),
            Some("https://cdn.discordapp.com/avatars/1/a1.png?size=64")
        );
        assert_eq!(members[1].display_name, "bob");
        assert!(members[1].avatar_url.is_none());
        assert_eq!(
            members[2].avatar_url.as_deref(),
            Some("https://cdn.discordapp.com/guilds/100/users/3/avatars/g3.png?size=64")
        );
        assert!(members[3].bot);
        assert!(members.iter().all(|m| m.presence.is_none()));
    }

    #[tokio::test]
    async fn test_fetch_members_merges_gateway_presence() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/guilds/100/members")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[
                    {"user": {"id": "1", "username": "alice"}},
                    {"user": {"id": "2", "username": "bob"}},
                    {"user": {"id": "3", "username": "robot", "bot": true}}
                ]"#,
            )
            .create_async()
            .await;

        let book = Arc::new(PresenceBook::new());
        book.record_chunk(
            [
                ("1".to_string(), PresenceStatus::Idle),
                ("3".to_string(), PresenceStatus::Online),
            ],
            true,
            true,
        );
        let client = DiscordClient::new(&server.url(), TOKEN)
            .unwrap()
            .with_presences(book);

        let members = client.fetch_members("100").await.unwrap();
        let presence: Vec<_> = members.iter().map(|m| m.presence).collect();
        assert_eq!(
            presence,
            vec![
                Some(PresenceStatus::Idle),
                Some(PresenceStatus::Offline),
                Some(PresenceStatus::Online),
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_members_unsynced_book_leaves_presence_unknown() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/guilds/100/members")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"user": {"id": "1", "username": "alice"}}]"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN)
            .unwrap()
            .with_presences(Arc::new(PresenceBook::new()));
        let members = client.fetch_members("100").await.unwrap();
        assert!(members[0].presence.is_none());
    }

    #[tokio::test]
    async fn test_fetch_channel_kind() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/channels/7")
            .with_status(200)
            .with_body(r#"{"id": "7", "type": 4, "name": "Category"}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let channel = client.fetch_channel("7").await.unwrap();
        assert_eq!(channel.kind, ChannelKind::Category);
        assert!(!channel.kind.has_messages());
    }

    #[tokio::test]
    async fn test_fetch_messages_with_before_cursor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/channels/7/messages")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "50".into()),
                Matcher::UrlEncoded("before".into(), "900".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[
                    {"id": "899", "attachments": [{"filename": "cat.png", "url": "https://cdn.example/cat.png"}]},
                    {"id": "898"}
                ]"#,
            )
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let page = client.fetch_messages("7", Some("900"), 50).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].attachments[0].filename, "cat.png");
        assert!(page[1].attachments.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/channels/7")
            .with_status(429)
            .with_body(r#"{"message": "You are being rate limited.", "retry_after": 0.01, "global": false}"#)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/channels/7")
            .with_status(200)
            .with_body(r#"{"id": "7", "type": 0, "name": "media"}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let channel = client.fetch_channel("7").await.unwrap();
        assert_eq!(channel.kind, ChannelKind::Text);
        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/channels/7")
            .with_status(429)
            .with_body(r#"{"message": "slow down", "retry_after": 0.01, "global": false}"#)
            .expect(3)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let err = client.fetch_channel("7").await.unwrap_err();
        assert!(matches!(err, PlatformError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_with_nan_retry_after_header() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/channels/7")
            .with_status(429)
            .with_header("retry-after", "NaN")
            .expect(3)
            .create_async()
            .await;

        // Two one-second fallback waits before giving up.
        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let err = client.fetch_channel("7").await.unwrap_err();
        match err {
            PlatformError::RateLimited(wait) => assert_eq!(wait, Duration::from_secs(1)),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_retry_wait_ignores_non_finite_values() {
        assert_eq!(retry_wait(Some(f64::NAN), Some(2.0)), Duration::from_secs(2));
        assert_eq!(retry_wait(None, Some(f64::INFINITY)), Duration::from_secs(1));
        assert_eq!(retry_wait(Some(f64::NEG_INFINITY), None), Duration::from_secs(1));
        assert_eq!(retry_wait(Some(0.25), Some(9.0)), Duration::from_millis(250));
        assert_eq!(retry_wait(Some(600.0), None), Duration::from_secs(60));
        assert_eq!(retry_wait(Some(-3.0), None), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_server() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/channels/7")
            .with_status(502)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url(), TOKEN).unwrap();
        let err = client.fetch_channel("7").await.unwrap_err();
        assert!(matches!(err, PlatformError::Server(_)));
    }
}
