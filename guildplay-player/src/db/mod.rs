//! Database access layer

pub mod settings;

pub use settings::{SettingsStore, SqliteSettingsStore, StaticSettings};
