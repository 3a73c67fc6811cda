//! Playback-related type definitions
//!
//! Supporting types for session playback state and loop policy.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Session playback state
///
/// A session has a current track exactly when it is `Loading`, `Playing`
/// or `Paused`. `BackgroundMusic` is filler audio with no current track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// Nothing playing, waiting for work
    #[default]
    Idle,
    /// A track was selected and is being downloaded/started
    Loading,
    /// Current track is audible
    Playing,
    /// Current track is paused on the transport
    Paused,
    /// Idle filler audio is playing
    BackgroundMusic,
}

impl PlayerState {
    /// True for the states that require a current track
    pub fn has_current(&self) -> bool {
        matches!(
            self,
            PlayerState::Loading | PlayerState::Playing | PlayerState::Paused
        )
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Loading => write!(f, "loading"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
            PlayerState::BackgroundMusic => write!(f, "background_music"),
        }
    }
}

/// What happens to a track after it finishes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Drop the finished track, continue with the queue head
    #[default]
    None,
    /// Replay the finished track
    Song,
    /// Append the finished track to the tail, continue with the head
    Queue,
    /// Append the finished track to the tail, continue with a random entry
    Random,
}

impl std::fmt::Display for LoopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopMode::None => write!(f, "none"),
            LoopMode::Song => write!(f, "song"),
            LoopMode::Queue => write!(f, "queue"),
            LoopMode::Random => write!(f, "random"),
        }
    }
}

impl FromStr for LoopMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(LoopMode::None),
            "song" | "track" | "one" => Ok(LoopMode::Song),
            "queue" | "all" => Ok(LoopMode::Queue),
            "random" | "shuffle" => Ok(LoopMode::Random),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown loop mode '{}'",
                other
            ))),
        }
    }
}
