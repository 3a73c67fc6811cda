//! # Guildplay Common Library
//!
//! Shared code for the guildplay crates including:
//! - Event types (GuildEvent enum) and the EventBus
//! - Playback state and loop mode enums
//! - Configuration file discovery
//! - Fade curve definitions and calculations
//! - Time helpers and human-readable durations

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod human_time;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, GuildEvent, GuildId, LoopMode, PlayerState};
pub use fade_curves::FadeCurve;
