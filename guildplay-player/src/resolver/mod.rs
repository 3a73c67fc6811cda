//! Resolution and fetch collaborators
//!
//! [`Resolver`] turns queries into metadata and supplies recommendations;
//! [`Fetcher`] writes a track's media into the cache directory as
//! `<id>.<ext>`. The download pipeline wraps both.

pub mod ytdlp;

pub use ytdlp::YtDlp;

use crate::error::Result;
use crate::track::TrackMeta;
use async_trait::async_trait;
use std::path::Path;

/// Container extensions tried when locating fetched media
pub const MEDIA_EXTENSIONS: &[&str] = &["webm", "m4a", "opus", "mp3", "ogg", "flac", "wav", "mka"];

/// Shape of a user query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Single media URL
    Direct,
    /// Playlist URL, listed flat
    Playlist,
    /// Free text, best match only
    Search,
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        let q = query.trim();
        let is_url = q.starts_with("http://") || q.starts_with("https://");
        if !is_url {
            return QueryKind::Search;
        }
        if q.contains("/playlist") || (q.contains("list=") && !q.contains("watch?v=")) {
            QueryKind::Playlist
        } else {
            QueryKind::Direct
        }
    }
}

/// Metadata and recommendation lookups
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Full metadata for a direct URL, or the search hits for free text
    async fn resolve(&self, query: &str) -> Result<Vec<TrackMeta>>;

    /// Flat listing of a playlist; entries carry minimal metadata
    async fn resolve_playlist(&self, query: &str) -> Result<Vec<TrackMeta>>;

    /// Tracks related to `seed_id`, best first
    async fn related(&self, seed_id: &str, limit: usize) -> Result<Vec<TrackMeta>>;
}

/// Produces a local playable file for a resolved track
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the track's media into `dest_dir` as `<id>.<ext>`
    async fn fetch(&self, track: &TrackMeta, dest_dir: &Path) -> Result<()>;
}
