//! Guildplay player - demo entry point
//!
//! Runs one guild session against the simulated transport, resolving and
//! downloading the given queries with yt-dlp. Events are logged as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use guildplay_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use guildplay_common::{EventBus, GuildId};
use guildplay_player::db::{SettingsStore, SqliteSettingsStore, StaticSettings};
use guildplay_player::download::{DownloadPipeline, MediaCache};
use guildplay_player::resolver::YtDlp;
use guildplay_player::transport::SimulatedTransport;
use guildplay_player::{PlayerConfig, SessionManager};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for guildplay-player
#[derive(Parser, Debug)]
#[command(name = "guildplay-player")]
#[command(about = "Per-guild playback orchestrator")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Guild to open a session for
    #[arg(short, long, default_value = "1")]
    guild: GuildId,

    /// Enable crossfading regardless of config
    #[arg(long)]
    crossfade: bool,

    /// Start radio mode seeded by the first queued track
    #[arg(long)]
    radio: bool,

    /// yt-dlp executable
    #[arg(long, default_value = "yt-dlp", env = "GUILDPLAY_YTDLP")]
    ytdlp: PathBuf,

    /// URLs, playlist URLs or search terms to enqueue
    queries: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = PlayerConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "guildplay_player={},guildplay_common=info",
                    config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let started_at = std::time::Instant::now();
    info!("Starting guildplay player for guild {}", args.guild);
    info!("Media cache: {}", config.cache_dir.display());

    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("Failed to create cache dir {}", config.cache_dir.display()))?;

    let ytdlp = Arc::new(YtDlp::new(&args.ytdlp));
    let cache = Arc::new(MediaCache::new(
        &config.cache_dir,
        config.downloads.evict_finished,
    ));
    let pipeline = Arc::new(DownloadPipeline::new(
        ytdlp.clone(),
        ytdlp,
        cache,
        config.download_timeout(),
    ));

    let settings: Arc<dyn SettingsStore> = match &config.database_path {
        Some(path) => Arc::new(
            SqliteSettingsStore::open(path, config.playback.max_queue_size)
                .await
                .context("Failed to open settings database")?,
        ),
        None => Arc::new(StaticSettings::new(config.playback.max_queue_size)),
    };

    let events = EventBus::default();
    tokio::spawn(log_events(events.clone()));

    let manager = SessionManager::new(Arc::new(config), pipeline, settings, events)
        .load_background()
        .await;

    let transport = Arc::new(SimulatedTransport::new());
    let session = manager
        .create_session(args.guild, transport)
        .await
        .context("Failed to create session")?;

    if args.crossfade {
        session.set_crossfade(true, None)?;
    }

    for query in &args.queries {
        match session.enqueue_query(query).await {
            Ok(outcome) => info!(
                query = %query,
                added = outcome.added,
                rejected = outcome.rejected,
                "Enqueued"
            ),
            Err(e) => warn!(query = %query, "Could not enqueue: {}", e),
        }
    }

    if args.radio {
        let seed = session
            .current_id()
            .or_else(|| session.queue_ids().into_iter().next());
        match seed {
            Some(seed) => {
                session.enable_radio(seed).await?;
            }
            None => warn!("Radio requested but nothing was queued to seed it"),
        }
    }

    shutdown_signal().await;

    manager.shutdown().await;
    info!(
        "Shutdown complete after {}",
        guildplay_common::human_time::format_uptime(started_at.elapsed())
    );
    Ok(())
}

/// Log every event published by the manager
async fn log_events(events: EventBus) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(guild = event.guild_id(), kind = event.event_type(), "{}", json),
                Err(e) => debug!("Unserializable event: {}", e),
            },
            Err(RecvError::Lagged(missed)) => warn!("Event log lagged, {} events dropped", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
