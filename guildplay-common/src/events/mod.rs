//! Event system
//!
//! Provides shared event definitions and the EventBus used by every
//! guildplay session.

mod playback_types;

pub use playback_types::{LoopMode, PlayerState};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Guild (tenant) identifier
pub type GuildId = u64;

/// Guildplay event types
///
/// Events are broadcast via EventBus and can be serialized for external
/// consumers (dashboards, loggers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GuildEvent {
    /// A session was created for a guild
    SessionCreated {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A session was torn down
    SessionDestroyed {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback state transition
    StateChanged {
        guild_id: GuildId,
        old_state: PlayerState,
        new_state: PlayerState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track became audible
    TrackStarted {
        guild_id: GuildId,
        track_id: String,
        title: String,
        /// True if the track was brought in by a crossfade
        crossfaded: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track left the "now playing" slot
    TrackFinished {
        guild_id: GuildId,
        track_id: String,
        /// False when the track was skipped or stopped
        completed: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track was dropped because it could not be played
    TrackFailed {
        guild_id: GuildId,
        track_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents changed
    QueueChanged {
        guild_id: GuildId,
        queue_len: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Crossfade between two tracks began
    CrossfadeStarted {
        guild_id: GuildId,
        outgoing_id: String,
        incoming_id: String,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Crossfade finished; the incoming track is now the only output
    CrossfadeCompleted {
        guild_id: GuildId,
        incoming_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Background filler started
    BackgroundStarted {
        guild_id: GuildId,
        file: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Background filler faded out and stopped
    BackgroundStopped {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Radio filler appended recommendations
    RadioExtended {
        guild_id: GuildId,
        added: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl GuildEvent {
    /// Guild this event belongs to
    pub fn guild_id(&self) -> GuildId {
        match self {
            GuildEvent::SessionCreated { guild_id, .. }
            | GuildEvent::SessionDestroyed { guild_id, .. }
            | GuildEvent::StateChanged { guild_id, .. }
            | GuildEvent::TrackStarted { guild_id, .. }
            | GuildEvent::TrackFinished { guild_id, .. }
            | GuildEvent::TrackFailed { guild_id, .. }
            | GuildEvent::QueueChanged { guild_id, .. }
            | GuildEvent::CrossfadeStarted { guild_id, .. }
            | GuildEvent::CrossfadeCompleted { guild_id, .. }
            | GuildEvent::BackgroundStarted { guild_id, .. }
            | GuildEvent::BackgroundStopped { guild_id, .. }
            | GuildEvent::RadioExtended { guild_id, .. } => *guild_id,
        }
    }

    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            GuildEvent::SessionCreated { .. } => "SessionCreated",
            GuildEvent::SessionDestroyed { .. } => "SessionDestroyed",
            GuildEvent::StateChanged { .. } => "StateChanged",
            GuildEvent::TrackStarted { .. } => "TrackStarted",
            GuildEvent::TrackFinished { .. } => "TrackFinished",
            GuildEvent::TrackFailed { .. } => "TrackFailed",
            GuildEvent::QueueChanged { .. } => "QueueChanged",
            GuildEvent::CrossfadeStarted { .. } => "CrossfadeStarted",
            GuildEvent::CrossfadeCompleted { .. } => "CrossfadeCompleted",
            GuildEvent::BackgroundStarted { .. } => "BackgroundStarted",
            GuildEvent::BackgroundStopped { .. } => "BackgroundStopped",
            GuildEvent::RadioExtended { .. } => "RadioExtended",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use guildplay_common::events::{EventBus, GuildEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(GuildEvent::SessionCreated {
///     guild_id: 7,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().guild_id(), 7);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GuildEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<GuildEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: GuildEvent,
    ) -> Result<usize, broadcast::error::SendError<GuildEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: GuildEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
