use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use twilight_model::id::Id;
use twilight_model::id::marker::GuildMarker;

use guildstat_server::config::ServerConfig;
use guildstat_server::engine::rate_limiter::RateLimiter;
use guildstat_server::engine::refresher::{RefreshSettings, Refresher};
use guildstat_server::engine::snapshot::StatusCache;
use guildstat_server::platform::gateway::track_presences;
use guildstat_server::platform::{DiscordClient, GuildPlatform, PresenceBook};
use guildstat_server::web::app_state::AppState;
use guildstat_server::web::router::build_router;

/// How often idle rate-limit buckets are dropped, and how idle they must be.
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(version, about = "Serve guild membership and media snapshots to a website widget")]
struct Args {
    /// Path to the TOML config file. Environment variables override it.
    #[arg(long, default_value = "guildstat.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match ServerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "guildstat stopped");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    let token = config
        .discord
        .token
        .as_deref()
        .context("bot token is not set")?;

    let cancel = CancellationToken::new();

    let mut client = DiscordClient::new(&config.discord.api_base_url, token)?;
    if config.discord.presence_gateway {
        match config
            .discord
            .guild_id
            .as_deref()
            .map(|id| id.trim().parse::<Id<GuildMarker>>())
        {
            Some(Ok(guild_id)) => {
                let book = Arc::new(PresenceBook::new());
                client = client.with_presences(book.clone());
                tokio::spawn(track_presences(
                    token.to_string(),
                    guild_id,
                    book,
                    cancel.clone(),
                ));
            }
            Some(Err(e)) => {
                warn!(error = %e, "guild id is not a snowflake, presence gateway disabled");
            }
            None => {}
        }
    }
    let platform: Arc<dyn GuildPlatform> = Arc::new(client);

    let me = platform
        .connect()
        .await
        .context("failed to connect to Discord")?;
    info!(bot_id = %me.id, "Logged in as {}", me.tag);

    if let Some(channel_id) = &config.discord.status_channel_id {
        info!(%channel_id, "status channel configured");
    }
    if config.discord.media_channel_ids.is_empty() {
        warn!("no media channels configured, photos and videos will stay empty");
    }

    let cache = Arc::new(StatusCache::new());
    let refresher = Arc::new(Refresher::new(
        platform,
        cache.clone(),
        RefreshSettings::from_config(&config),
    ));

    // First snapshot before the listener opens.
    refresher.refresh().await;

    let state = Arc::new(AppState {
        cache,
        limiter: RateLimiter::new(config.rate_limit.burst, config.rate_limit.per_seconds),
    });

    let sweep_state = state.clone();
    let sweep_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    sweep_state.limiter.sweep(LIMITER_SWEEP_INTERVAL);
                    debug!(clients = sweep_state.limiter.tracked_clients(), "rate limiter swept");
                }
            }
        }
    });

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {address}"))?;
    info!("HTTP API listening on {}", address);

    tokio::spawn(refresher.run(cancel.clone()));
    tokio::spawn(shutdown_signal(cancel.clone()));

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.clone().cancelled_owned())
    .await
    .context("HTTP server error")?;

    cancel.cancel();
    info!("Server shut down");
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    cancel.cancel();
}
