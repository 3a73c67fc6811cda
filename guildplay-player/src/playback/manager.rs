//! Session manager
//!
//! Owns every guild's session. Create and destroy are serialized per guild
//! so a destroy racing a create never leaves a half-built session behind.

use super::fallback::BackgroundRotation;
use super::session::{Session, SessionDeps};
use super::snapshot::SessionSnapshot;
use crate::config::PlayerConfig;
use crate::db::SettingsStore;
use crate::download::DownloadPipeline;
use crate::error::{Error, Result};
use crate::transport::Transport;
use guildplay_common::{EventBus, GuildEvent, GuildId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub struct SessionManager {
    config: Arc<PlayerConfig>,
    pipeline: Arc<DownloadPipeline>,
    settings: Arc<dyn SettingsStore>,
    events: EventBus,
    /// Shared by every session's preloader
    permits: Arc<Semaphore>,
    background: BackgroundRotation,
    sessions: Mutex<HashMap<GuildId, Arc<Session>>>,
    guild_locks: Mutex<HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        config: Arc<PlayerConfig>,
        pipeline: Arc<DownloadPipeline>,
        settings: Arc<dyn SettingsStore>,
        events: EventBus,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.downloads.max_concurrent.max(1)));
        Self {
            config,
            pipeline,
            settings,
            events,
            permits,
            background: BackgroundRotation::default(),
            sessions: Mutex::new(HashMap::new()),
            guild_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Use `rotation` as the background music for new sessions
    pub fn with_background(mut self, rotation: BackgroundRotation) -> Self {
        self.background = rotation;
        self
    }

    /// Load background music from the configured folder, if enabled
    pub async fn load_background(self) -> Self {
        let background = &self.config.background;
        match (&background.directory, background.enabled) {
            (Some(dir), true) => {
                let rotation = BackgroundRotation::load(dir).await;
                self.with_background(rotation)
            }
            _ => self,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn pipeline(&self) -> &Arc<DownloadPipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &Arc<PlayerConfig> {
        &self.config
    }

    /// Create the guild's session and start its player loop
    ///
    /// Fails with `AlreadyConnected` if the guild already has one; the
    /// transport is left untouched in that case.
    pub async fn create_session(
        &self,
        guild: GuildId,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Session>> {
        let lock = self.guild_lock(guild);
        let _guard = lock.lock().await;

        if self.get(guild).is_some() {
            return Err(Error::AlreadyConnected(guild));
        }

        let max_queue = match self.settings.max_queue_size(guild).await {
            Ok(size) => size,
            Err(e) => {
                warn!(guild, "Queue size lookup failed, using default: {}", e);
                self.config.playback.max_queue_size
            }
        };

        transport.connect().await?;

        let session = Arc::new(Session::start(
            guild,
            transport,
            SessionDeps {
                config: Arc::clone(&self.config),
                pipeline: Arc::clone(&self.pipeline),
                permits: Arc::clone(&self.permits),
                events: self.events.clone(),
                background: self.background.clone(),
                max_queue,
            },
        ));
        self.lock_sessions().insert(guild, Arc::clone(&session));

        info!(guild, "Session created");
        self.events.emit_lossy(GuildEvent::SessionCreated {
            guild_id: guild,
            timestamp: chrono::Utc::now(),
        });
        Ok(session)
    }

    /// Tear the guild's session down; a no-op if there is none
    pub async fn destroy_session(&self, guild: GuildId) {
        let lock = self.guild_lock(guild);
        let guard = lock.lock().await;

        let removed = self.lock_sessions().remove(&guild);
        if let Some(session) = removed {
            session.shutdown().await;

            info!(guild, "Session destroyed");
            self.events.emit_lossy(GuildEvent::SessionDestroyed {
                guild_id: guild,
                timestamp: chrono::Utc::now(),
            });
        }

        drop(guard);
        self.forget_guild_lock(guild, lock);
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<Session>> {
        self.lock_sessions().get(&guild).cloned()
    }

    /// Like [`get`](Self::get), failing with `NotConnected`
    pub fn require(&self, guild: GuildId) -> Result<Arc<Session>> {
        self.get(guild).ok_or(Error::NotConnected(guild))
    }

    /// Snapshots of every session, ordered by guild
    pub fn summaries(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> = self.lock_sessions().values().cloned().collect();
        let mut snapshots: Vec<SessionSnapshot> = sessions.iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by_key(|s| s.guild_id);
        snapshots
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Destroy every session
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.lock_sessions().keys().copied().collect();
        for guild in guilds {
            self.destroy_session(guild).await;
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<GuildId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn guild_lock(&self, guild: GuildId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.lock_guild_locks();
        Arc::clone(locks.entry(guild).or_default())
    }

    /// Drop the guild's lock entry unless another caller still holds it
    fn forget_guild_lock(&self, guild: GuildId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.lock_guild_locks();
        let current = locks.get(&guild).is_some_and(|l| Arc::ptr_eq(l, &lock));
        // One reference in the map, one in `lock`
        if current && Arc::strong_count(&lock) == 2 {
            locks.remove(&guild);
        }
    }

    fn lock_guild_locks(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>> {
        self.guild_locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
