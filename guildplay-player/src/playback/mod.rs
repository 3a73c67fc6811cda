//! Playback orchestration
//!
//! A [`SessionManager`] owns one [`Session`] per guild. Each session runs a
//! player loop that owns the "now playing" slot, plus cancellable child
//! tasks for crossfades, the idle timer and the radio filler.

pub mod crossfade;
pub mod fade;
pub mod fallback;
pub mod manager;
mod player;
pub mod queue;
mod radio;
pub mod session;
pub mod snapshot;
pub mod state;

pub use crossfade::{CrossfadeEngine, CrossfadeOutcome, CrossfadeRequest};
pub use fallback::BackgroundRotation;
pub use manager::SessionManager;
pub use queue::TrackQueue;
pub use session::{EnqueueOutcome, Session};
pub use snapshot::{QueueItem, SessionSnapshot, TrackSummary, SNAPSHOT_QUEUE_LIMIT};
