//! Audio transport seam
//!
//! The orchestrator never decodes audio itself. It hands local media to a
//! [`Transport`], adjusts per-stream gain for fades, and awaits a single-shot
//! [`Completion`] for every stream it starts.

pub mod simulated;

pub use simulated::{SimulatedTransport, TransportCall};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

/// Identifies one stream started on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Reached the end of the media
    Finished,
    /// Stopped by `stop` or `disconnect`
    Stopped,
    /// Output failed mid-stream
    Error(String),
}

/// Resolves exactly once when the stream ends
pub type Completion = oneshot::Receiver<StreamEnd>;

/// Media handed to the transport
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub path: PathBuf,
    /// Length hint; zero when unbounded or unknown
    pub duration: Duration,
    /// Human-readable label for logs
    pub label: String,
}

/// Live audio output of one guild
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Stops every stream and releases the output
    async fn disconnect(&self) -> Result<()>;

    /// Start a stream at the given gain (0.0-1.0)
    async fn play(&self, source: MediaSource, gain: f32) -> Result<(StreamId, Completion)>;

    /// Stop a stream; its completion has fired by the time this returns
    async fn stop(&self, stream: StreamId) -> Result<()>;

    async fn set_gain(&self, stream: StreamId, gain: f32) -> Result<()>;

    /// Pause every active stream
    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    fn is_playing(&self) -> bool;

    fn is_paused(&self) -> bool;
}
