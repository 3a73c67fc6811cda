//! Shared fixtures for session integration tests
//!
//! A scripted resolver/fetcher pair stands in for yt-dlp and the
//! simulated transport stands in for the voice connection. Track durations
//! are in milliseconds so whole scenarios run in well under a second.

#![allow(dead_code)]

use async_trait::async_trait;
use guildplay_common::{GuildEvent, GuildId};
use guildplay_player::config::PlayerConfig;
use guildplay_player::db::StaticSettings;
use guildplay_player::download::{DownloadPipeline, MediaCache};
use guildplay_player::playback::{BackgroundRotation, Session, SessionManager};
use guildplay_player::resolver::{Fetcher, Resolver};
use guildplay_player::transport::{SimulatedTransport, TransportCall};
use guildplay_player::{Error, Result, TrackMeta};
use guildplay_common::EventBus;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const GUILD: GuildId = 42;

/// Generous upper bound for any wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

pub fn meta(id: &str, duration_ms: u64) -> TrackMeta {
    let mut meta = TrackMeta::minimal(id, id.to_uppercase(), format!("https://media.invalid/{id}"));
    meta.duration = Duration::from_millis(duration_ms);
    meta
}

/// Resolver answering from fixed tables
#[derive(Default)]
pub struct ScriptedResolver {
    queries: Mutex<HashMap<String, Vec<TrackMeta>>>,
    related: Mutex<HashMap<String, Vec<TrackMeta>>>,
    pub related_calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn add(&self, query: &str, metas: Vec<TrackMeta>) {
        self.queries.lock().unwrap().insert(query.to_string(), metas);
    }

    pub fn add_related(&self, seed: &str, metas: Vec<TrackMeta>) {
        self.related.lock().unwrap().insert(seed.to_string(), metas);
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve(&self, query: &str) -> Result<Vec<TrackMeta>> {
        Ok(self
            .queries
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_playlist(&self, query: &str) -> Result<Vec<TrackMeta>> {
        self.resolve(query).await
    }

    async fn related(&self, seed_id: &str, limit: usize) -> Result<Vec<TrackMeta>> {
        self.related_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .related
            .lock()
            .unwrap()
            .get(seed_id)
            .map(|metas| metas.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Fetcher writing a small file per track, with per-id failure injection
#[derive(Default)]
pub struct ScriptedFetcher {
    delay: Mutex<Duration>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// Fetches of `id` never complete
    pub fn hang(&self, id: &str) {
        self.hanging.lock().unwrap().insert(id.to_string());
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, track: &TrackMeta, dest_dir: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(track.id.clone());
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if self.hanging.lock().unwrap().contains(&track.id) {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(&track.id) {
            return Err(Error::Download(format!("{} is unavailable", track.id)));
        }
        tokio::fs::write(dest_dir.join(format!("{}.webm", track.id)), b"audio").await?;
        Ok(())
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub resolver: Arc<ScriptedResolver>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub manager: SessionManager,
    pub transport: SimulatedTransport,
}

/// Config with fast timers; tests adjust individual fields
pub fn test_config(cache_dir: &Path) -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.cache_dir = cache_dir.to_path_buf();
    config.downloads.timeout_ms = 2_000;
    config.playback.startup_timeout_ms = 500;
    config.playback.max_queue_size = 100;
    config.crossfade.enabled = false;
    config.crossfade.steps = 10;
    config.background.idle_delay_ms = 100;
    config.background.fade_ms = 50;
    config.background.steps = 5;
    config.radio.poll_interval_ms = 30;
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut PlayerConfig)) -> Self {
        Self::build(adjust, StaticSettings::new(100), BackgroundRotation::default())
    }

    pub fn build(
        adjust: impl FnOnce(&mut PlayerConfig),
        settings: StaticSettings,
        background: BackgroundRotation,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);

        let resolver = Arc::new(ScriptedResolver::default());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let cache = Arc::new(MediaCache::new(dir.path(), config.downloads.evict_finished));
        let pipeline = Arc::new(DownloadPipeline::new(
            resolver.clone(),
            fetcher.clone(),
            cache,
            config.download_timeout(),
        ));
        let manager = SessionManager::new(
            Arc::new(config),
            pipeline,
            Arc::new(settings),
            EventBus::new(1024),
        )
        .with_background(background);

        Self {
            dir,
            resolver,
            fetcher,
            manager,
            transport: SimulatedTransport::new(),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<GuildEvent> {
        self.manager.events().subscribe()
    }

    pub async fn session(&self) -> Arc<Session> {
        self.manager
            .create_session(GUILD, Arc::new(self.transport.clone()))
            .await
            .unwrap()
    }

    /// Resolve `metas` under their own ids and enqueue them one by one
    pub async fn enqueue(&self, session: &Session, metas: Vec<TrackMeta>) {
        for meta in metas {
            let id = meta.id.clone();
            self.resolver.add(&id, vec![meta]);
            session.enqueue_query(&id).await.unwrap();
        }
    }
}

/// Filler files in their own directory
pub fn background_files(names: &[&str]) -> (tempfile::TempDir, Vec<PathBuf>) {
    let dir = tempfile::tempdir().unwrap();
    let files = names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"filler").unwrap();
            path
        })
        .collect();
    (dir, files)
}

/// Poll `check` every 5ms until it holds, failing after [`WAIT`]
pub async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Receive events until one matches, failing after [`WAIT`]
pub async fn next_matching(
    rx: &mut broadcast::Receiver<GuildEvent>,
    mut matches: impl FnMut(&GuildEvent) -> bool,
) -> GuildEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("expected event not seen")
}

/// Index of the first call matching `pred`
pub fn position_of(calls: &[TransportCall], pred: impl Fn(&TransportCall) -> bool) -> Option<usize> {
    calls.iter().position(pred)
}
