//! Track entity
//!
//! A [`Track`] is a cheap-to-clone handle: metadata is immutable, while the
//! download status is shared between every clone so the download pipeline
//! can publish state changes to the queue, the preloader and the player.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// How a track's metadata was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Direct URL, full metadata
    Direct,
    /// Free-text search, best match, full metadata
    Search,
    /// Flat playlist listing, minimal metadata
    Playlist,
    /// Recommendation from the radio filler, minimal metadata
    Radio,
}

/// Download lifecycle of a track's local media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    Unrequested,
    InFlight,
    Ready,
    Failed,
}

/// Metadata returned by a resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMeta {
    /// Stable source id (e.g. a video id)
    pub id: String,
    pub title: String,
    /// Zero means unbounded (live) or unknown
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub uploader: Option<String>,
    pub url: String,
    pub thumbnail: Option<String>,
}

impl TrackMeta {
    /// Minimal metadata, as produced by flat playlist listings
    pub fn minimal(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            duration: Duration::ZERO,
            uploader: None,
            url: url.into(),
            thumbnail: None,
        }
    }
}

#[derive(Debug, Default)]
struct MediaStatus {
    state: DownloadState,
    path: Option<PathBuf>,
}

/// A resolved track referenced by a queue or the current slot
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique per enqueue; distinguishes repeated submissions of one source
    pub entry_id: Uuid,
    pub meta: TrackMeta,
    pub provenance: Provenance,
    status: Arc<Mutex<MediaStatus>>,
}

impl Track {
    pub fn new(meta: TrackMeta, provenance: Provenance) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            meta,
            provenance,
            status: Arc::new(Mutex::new(MediaStatus::default())),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn title(&self) -> &str {
        &self.meta.title
    }

    pub fn duration(&self) -> Duration {
        self.meta.duration
    }

    /// True for live or unknown-length media
    pub fn is_unbounded(&self) -> bool {
        self.meta.duration.is_zero()
    }

    pub fn download_state(&self) -> DownloadState {
        self.status.lock().map(|s| s.state).unwrap_or_default()
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        self.status.lock().ok().and_then(|s| s.path.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.download_state() == DownloadState::Ready
    }

    pub(crate) fn mark_in_flight(&self) {
        if let Ok(mut status) = self.status.lock() {
            if status.state != DownloadState::Ready {
                status.state = DownloadState::InFlight;
            }
        }
    }

    pub(crate) fn mark_ready(&self, path: PathBuf) {
        if let Ok(mut status) = self.status.lock() {
            status.state = DownloadState::Ready;
            status.path = Some(path);
        }
    }

    pub(crate) fn mark_failed(&self) {
        if let Ok(mut status) = self.status.lock() {
            status.state = DownloadState::Failed;
            status.path = None;
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
