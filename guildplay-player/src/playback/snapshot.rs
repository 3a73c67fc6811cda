//! Public view of a session for rendering

use super::state::SessionState;
use crate::track::{DownloadState, Track, TrackMeta};
use crate::transport::Transport;
use guildplay_common::human_time::format_track_length;
use guildplay_common::{GuildId, LoopMode, PlayerState};
use serde::Serialize;

/// Queue entries included in a snapshot
pub const SNAPSHOT_QUEUE_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub id: String,
    pub title: String,
    pub duration_secs: u64,
    /// "M:SS", "H:MM:SS" or "live"
    pub duration: String,
    pub uploader: Option<String>,
    pub url: String,
    pub thumbnail: Option<String>,
}

impl From<&TrackMeta> for TrackSummary {
    fn from(meta: &TrackMeta) -> Self {
        Self {
            id: meta.id.clone(),
            title: meta.title.clone(),
            duration_secs: meta.duration.as_secs(),
            duration: format_track_length(meta.duration),
            uploader: meta.uploader.clone(),
            url: meta.url.clone(),
            thumbnail: meta.thumbnail.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    /// 1-based
    pub position: usize,
    #[serde(flatten)]
    pub track: TrackSummary,
    pub is_downloaded: bool,
}

impl QueueItem {
    fn new(position: usize, track: &Track) -> Self {
        Self {
            position,
            track: TrackSummary::from(&track.meta),
            is_downloaded: track.download_state() == DownloadState::Ready,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub state: PlayerState,
    pub current: Option<TrackSummary>,
    pub queue: Vec<QueueItem>,
    pub queue_size: usize,
    pub queue_capacity: usize,
    /// 0-100
    pub volume: u8,
    pub loop_mode: LoopMode,
    pub radio: bool,
    pub crossfade: bool,
    pub crossfade_ms: u64,
    pub is_playing: bool,
    pub is_paused: bool,
    pub background_file: Option<String>,
    pub recent: Vec<TrackSummary>,
}

impl SessionSnapshot {
    pub(crate) fn capture(guild: GuildId, state: &SessionState, transport: &dyn Transport) -> Self {
        let current = match state.state() {
            PlayerState::BackgroundMusic => None,
            _ => state.current().map(|t| TrackSummary::from(&t.meta)),
        };
        Self {
            guild_id: guild,
            state: state.state(),
            current,
            queue: state
                .queue
                .iter()
                .take(SNAPSHOT_QUEUE_LIMIT)
                .enumerate()
                .map(|(i, t)| QueueItem::new(i + 1, t))
                .collect(),
            queue_size: state.queue.len(),
            queue_capacity: state.queue.capacity(),
            volume: (state.volume.clamp(0.0, 1.0) * 100.0).round() as u8,
            loop_mode: state.loop_mode,
            radio: state.radio.enabled,
            crossfade: state.crossfade.enabled,
            crossfade_ms: state.crossfade.duration.as_millis() as u64,
            is_playing: transport.is_playing(),
            is_paused: transport.is_paused(),
            background_file: state.background_file.clone(),
            recent: state.history().rev().map(TrackSummary::from).collect(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == PlayerState::Idle
    }
}
