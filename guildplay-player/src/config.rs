//! Configuration for the guildplay player
//!
//! Bootstrap settings are read once from TOML; every key has a built-in
//! default so a missing or partial file still yields a usable config.
//!
//! ```toml
//! cache_dir = "/var/cache/guildplay"
//!
//! [downloads]
//! max_concurrent = 3
//! timeout_ms = 45000
//!
//! [crossfade]
//! enabled = true
//! duration_ms = 5000
//! ```

use crate::error::{Error, Result};
use guildplay_common::time::millis_to_duration;
use guildplay_common::FadeCurve;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level player configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Directory downloaded media is written to
    pub cache_dir: PathBuf,

    /// Optional SQLite database holding per-guild settings
    pub database_path: Option<PathBuf>,

    pub downloads: DownloadConfig,
    pub playback: PlaybackConfig,
    pub crossfade: CrossfadeConfig,
    pub background: BackgroundConfig,
    pub radio: RadioConfig,
    pub logging: LoggingConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            cache_dir: guildplay_common::config::default_cache_dir(),
            database_path: None,
            downloads: DownloadConfig::default(),
            playback: PlaybackConfig::default(),
            crossfade: CrossfadeConfig::default(),
            background: BackgroundConfig::default(),
            radio: RadioConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Download pipeline and preloader settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Size of the preload worker pool
    pub max_concurrent: usize,
    /// Upper bound for a single fetch
    pub timeout_ms: u64,
    /// Upcoming tracks preloaded for ordinary queueing
    pub preload_limit: usize,
    /// Upcoming tracks preloaded while radio mode is on
    pub radio_preload_limit: usize,
    /// Delete media files once no session references them
    pub evict_finished: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            timeout_ms: 45_000,
            preload_limit: 2,
            radio_preload_limit: 5,
            evict_finished: true,
        }
    }
}

/// Player loop settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How long the transport may take to accept a stream
    pub startup_timeout_ms: u64,
    /// Initial session volume (0.0-1.0)
    pub default_volume: f32,
    /// Queue capacity when the settings store has no override
    pub max_queue_size: usize,
    /// Number of finished tracks remembered per session
    pub history_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 750,
            default_volume: 0.5,
            max_queue_size: 100,
            history_size: 25,
        }
    }
}

/// Crossfade defaults applied to new sessions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrossfadeConfig {
    pub enabled: bool,
    /// Zero means hard cuts even when enabled
    pub duration_ms: u64,
    /// Number of discrete gain updates per crossfade
    pub steps: u32,
    pub curve: FadeCurve,
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_ms: 5_000,
            steps: 40,
            curve: FadeCurve::Linear,
        }
    }
}

/// Idle background music
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub enabled: bool,
    /// Folder scanned for filler tracks
    pub directory: Option<PathBuf>,
    /// Idle time before filler starts
    pub idle_delay_ms: u64,
    /// Filler gain relative to session volume
    pub gain: f32,
    pub fade_ms: u64,
    pub steps: u32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: None,
            idle_delay_ms: 60_000,
            gain: 0.15,
            fade_ms: 3_000,
            steps: 20,
        }
    }
}

/// Radio filler
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub poll_interval_ms: u64,
    /// Queue length the filler tops up to
    pub threshold: usize,
    /// Recommendations requested per poll
    pub fetch_limit: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            threshold: 5,
            fetch_limit: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Load configuration from an optional TOML file and validate it
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: PlayerConfig = guildplay_common::config::load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the player cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.downloads.max_concurrent == 0 {
            return Err(Error::Config(
                "downloads.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.downloads.timeout_ms == 0 {
            return Err(Error::Config("downloads.timeout_ms must be non-zero".to_string()));
        }
        if self.playback.startup_timeout_ms == 0 {
            return Err(Error::Config(
                "playback.startup_timeout_ms must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.playback.default_volume) {
            return Err(Error::Config(format!(
                "playback.default_volume {} outside 0.0-1.0",
                self.playback.default_volume
            )));
        }
        if self.playback.max_queue_size == 0 {
            return Err(Error::Config(
                "playback.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.crossfade.steps == 0 || self.background.steps == 0 {
            return Err(Error::Config("fade step counts must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.background.gain) {
            return Err(Error::Config(format!(
                "background.gain {} outside 0.0-1.0",
                self.background.gain
            )));
        }
        if self.radio.poll_interval_ms == 0 {
            return Err(Error::Config("radio.poll_interval_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        millis_to_duration(self.downloads.timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        millis_to_duration(self.playback.startup_timeout_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        millis_to_duration(self.background.idle_delay_ms)
    }

    pub fn background_fade(&self) -> Duration {
        millis_to_duration(self.background.fade_ms)
    }

    pub fn radio_poll_interval(&self) -> Duration {
        millis_to_duration(self.radio.poll_interval_ms)
    }
}
