//! Background music rotation
//!
//! Filler files are discovered once, shuffled once, then cycled.

use crate::resolver::MEDIA_EXTENSIONS;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct BackgroundRotation {
    files: Vec<PathBuf>,
    next: usize,
}

impl BackgroundRotation {
    pub fn new(mut files: Vec<PathBuf>) -> Self {
        files.shuffle(&mut rand::thread_rng());
        Self { files, next: 0 }
    }

    /// Scan `dir` (non-recursive) for playable files
    pub async fn load(dir: &Path) -> Self {
        let mut files = Vec::new();
        match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let path = entry.path();
                    if is_media_file(&path) {
                        files.push(path);
                    }
                }
            }
            Err(e) => {
                warn!(dir = %dir.display(), "Background music folder unreadable: {}", e);
            }
        }
        info!(dir = %dir.display(), count = files.len(), "Loaded background music");
        Self::new(files)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Next filler in rotation, wrapping around
    pub fn next_file(&mut self) -> Option<PathBuf> {
        if self.files.is_empty() {
            return None;
        }
        let file = self.files[self.next % self.files.len()].clone();
        self.next = (self.next + 1) % self.files.len();
        Some(file)
    }
}

fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
