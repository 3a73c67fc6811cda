//! Error types for guildplay-player
//!
//! Per-track failures (resolution aside) are absorbed by the player loop;
//! lifecycle failures are surfaced to intent callers.

use thiserror::Error;

/// Main error type for guildplay-player
#[derive(Error, Debug)]
pub enum Error {
    /// Query produced no results or the resolver failed
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Fetching a track's media failed
    #[error("Download error: {0}")]
    Download(String),

    /// Fetching a track's media exceeded the download timeout
    #[error("Download timed out after {0:?}")]
    DownloadTimeout(std::time::Duration),

    /// Local media missing or unplayable at play time
    #[error("Decode error: {0}")]
    Decode(String),

    /// Transport connect/start/control failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Crossfade could not be prepared; caller falls back to a hard cut
    #[error("Crossfade error: {0}")]
    Crossfade(String),

    /// A session already exists for this guild
    #[error("Already connected to guild {0}")]
    AlreadyConnected(u64),

    /// No session exists for this guild
    #[error("Not connected to guild {0}")]
    NotConnected(u64),

    /// Queue cannot accept more tracks
    #[error("Queue is full ({0} tracks)")]
    QueueFull(usize),

    /// Queue position out of range (1-based)
    #[error("Invalid queue position: {0}")]
    InvalidPosition(usize),

    /// Volume outside 0.0-1.0
    #[error("Invalid volume: {0}")]
    InvalidVolume(f32),

    /// Operation not valid in the current playback state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Output is in use (speech refused while playing)
    #[error("Busy: {0}")]
    Busy(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task was cancelled (session teardown)
    #[error("Cancelled")]
    Cancelled,

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Failures scoped to a single track: the player loop drops the track
    /// and advances instead of surfacing them.
    pub fn is_track_failure(&self) -> bool {
        matches!(
            self,
            Error::Download(_) | Error::DownloadTimeout(_) | Error::Decode(_) | Error::Crossfade(_)
        )
    }
}

impl From<guildplay_common::Error> for Error {
    fn from(err: guildplay_common::Error) -> Self {
        match err {
            guildplay_common::Error::Io(e) => Error::Io(e),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using guildplay-player Error
pub type Result<T> = std::result::Result<T, Error>;
