//! yt-dlp backed resolver and fetcher
//!
//! Metadata comes from `yt-dlp -J` (full) and `yt-dlp -J --flat-playlist`
//! (listing); recommendations from the seed's auto-generated mix playlist.

use super::{Fetcher, Resolver};
use crate::error::{Error, Result};
use crate::track::TrackMeta;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct YtEntry {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    entries: Option<Vec<YtEntry>>,
}

impl YtEntry {
    fn into_meta(self) -> Option<TrackMeta> {
        let id = self.id?;
        let url = self
            .webpage_url
            .or(self.url)
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));
        Some(TrackMeta {
            title: self.title.unwrap_or_else(|| id.clone()),
            duration: guildplay_common::time::secs_f64_to_duration(self.duration.unwrap_or(0.0)),
            uploader: self.uploader.or(self.channel),
            url,
            thumbnail: self.thumbnail,
            id,
        })
    }

    /// Flatten a playlist-shaped document into its entries
    fn into_metas(self) -> Vec<TrackMeta> {
        match self.entries {
            Some(entries) => entries.into_iter().filter_map(YtEntry::into_meta).collect(),
            None => self.into_meta().into_iter().collect(),
        }
    }
}

/// Parse the JSON document printed by `yt-dlp -J`
pub fn parse_info_json(raw: &[u8]) -> Result<Vec<TrackMeta>> {
    let entry: YtEntry = serde_json::from_slice(raw)
        .map_err(|e| Error::Resolution(format!("unreadable yt-dlp output: {e}")))?;
    Ok(entry.into_metas())
}

/// Shells out to the `yt-dlp` executable
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn dump_json(&self, args: &[&str]) -> Result<Vec<TrackMeta>> {
        debug!(program = %self.program.display(), ?args, "Running yt-dlp");
        let output = Command::new(&self.program)
            .args(["-J", "--no-warnings"])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Resolution(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Resolution(stderr.trim().to_string()));
        }
        parse_info_json(&output.stdout)
    }
}

#[async_trait]
impl Resolver for YtDlp {
    async fn resolve(&self, query: &str) -> Result<Vec<TrackMeta>> {
        if query.starts_with("http://") || query.starts_with("https://") {
            self.dump_json(&["--no-playlist", query]).await
        } else {
            let search = format!("ytsearch1:{query}");
            self.dump_json(&[&search]).await
        }
    }

    async fn resolve_playlist(&self, query: &str) -> Result<Vec<TrackMeta>> {
        self.dump_json(&["--flat-playlist", query]).await
    }

    async fn related(&self, seed_id: &str, limit: usize) -> Result<Vec<TrackMeta>> {
        let mix = format!("https://www.youtube.com/watch?v={seed_id}&list=RD{seed_id}");
        let end = (limit + 1).to_string();
        let metas = self
            .dump_json(&["--flat-playlist", "--playlist-end", &end, &mix])
            .await?;
        Ok(metas
            .into_iter()
            .filter(|m| m.id != seed_id)
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl Fetcher for YtDlp {
    async fn fetch(&self, track: &TrackMeta, dest_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let template = dest_dir.join(format!("{}.%(ext)s", track.id));
        let started = std::time::Instant::now();

        let output = Command::new(&self.program)
            .args(["-f", "bestaudio", "--no-playlist", "--no-warnings", "-o"])
            .arg(&template)
            .arg(&track.url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Download(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(track = %track.id, "yt-dlp download failed: {}", stderr.trim());
            return Err(Error::Download(stderr.trim().to_string()));
        }
        debug!(
            track = %track.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "yt-dlp download finished"
        );
        Ok(())
    }
}
