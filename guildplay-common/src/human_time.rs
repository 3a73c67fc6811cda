//! Human-readable time formatting
//!
//! Provides consistent track-length display across guildplay snapshots.

use std::time::Duration;

/// Format a track length for display.
///
/// - Zero → `"live"` (unbounded stream)
/// - Under an hour → `M:SS`
/// - Otherwise → `H:MM:SS`
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use guildplay_common::human_time::format_track_length;
///
/// assert_eq!(format_track_length(Duration::ZERO), "live");
/// assert_eq!(format_track_length(Duration::from_secs(5)), "0:05");
/// assert_eq!(format_track_length(Duration::from_secs(330)), "5:30");
/// assert_eq!(format_track_length(Duration::from_secs(3661)), "1:01:01");
/// ```
pub fn format_track_length(length: Duration) -> String {
    if length.is_zero() {
        return "live".to_string();
    }

    let total = length.as_secs();
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;

    if hours == 0 {
        format!("{}:{:02}", mins, secs)
    } else {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    }
}

/// Format an uptime as `Xh Ym`
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    format!("{}h {}m", total / 3600, (total % 3600) / 60)
}
