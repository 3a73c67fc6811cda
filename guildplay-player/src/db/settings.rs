//! Per-guild settings lookups
//!
//! The orchestrator only ever reads the queue capacity; writes belong to
//! whatever administers the database.

use crate::error::{Error, Result};
use async_trait::async_trait;
use guildplay_common::GuildId;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Read-only settings lookup
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn max_queue_size(&self, guild: GuildId) -> Result<usize>;
}

/// Config default plus in-memory overrides
#[derive(Debug, Clone)]
pub struct StaticSettings {
    default_max_queue: usize,
    overrides: HashMap<GuildId, usize>,
}

impl StaticSettings {
    pub fn new(default_max_queue: usize) -> Self {
        Self {
            default_max_queue,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, guild: GuildId, max_queue: usize) -> Self {
        self.overrides.insert(guild, max_queue);
        self
    }
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn max_queue_size(&self, guild: GuildId) -> Result<usize> {
        Ok(self
            .overrides
            .get(&guild)
            .copied()
            .unwrap_or(self.default_max_queue))
    }
}

/// SQLite-backed settings (`guild_settings` table)
pub struct SqliteSettingsStore {
    db: Pool<Sqlite>,
    default_max_queue: usize,
}

impl SqliteSettingsStore {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path, default_max_queue: usize) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&db_url)
            .await?;
        info!("Connected to settings database: {}", path.display());
        Self::from_pool(db, default_max_queue).await
    }

    /// Wrap an existing pool, creating the table if missing
    pub async fn from_pool(db: Pool<Sqlite>, default_max_queue: usize) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS guild_settings (
                guild_id INTEGER PRIMARY KEY,
                max_queue_size INTEGER
            )",
        )
        .execute(&db)
        .await?;
        Ok(Self {
            db,
            default_max_queue,
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.db
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn max_queue_size(&self, guild: GuildId) -> Result<usize> {
        let guild_id = i64::try_from(guild)
            .map_err(|_| Error::Config(format!("guild id {guild} out of range")))?;
        let value: Option<Option<i64>> =
            sqlx::query_scalar("SELECT max_queue_size FROM guild_settings WHERE guild_id = ?")
                .bind(guild_id)
                .fetch_optional(&self.db)
                .await?;

        match value.flatten() {
            Some(size) if size > 0 => Ok(size as usize),
            Some(size) => Err(Error::Config(format!(
                "max_queue_size {size} for guild {guild} must be positive"
            ))),
            None => Ok(self.default_max_queue),
        }
    }
}
