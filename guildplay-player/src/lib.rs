//! # Guildplay Player Library (guildplay-player)
//!
//! Per-guild playback orchestration: queueing, download preloading, loop
//! modes, crossfades, background music and radio mode.
//!
//! **Architecture:** one session per guild, driven by a single player loop
//! task; audio output sits behind the [`transport::Transport`] trait and
//! media arrives through the [`resolver`] traits.

pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod playback;
pub mod resolver;
pub mod track;
pub mod transport;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use playback::{Session, SessionManager, SessionSnapshot};
pub use track::{Provenance, Track, TrackMeta};
