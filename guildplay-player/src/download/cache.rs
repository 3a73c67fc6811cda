//! Media file lifecycle
//!
//! Tracks how many session entries reference each source id and deletes
//! the cached file once the last reference leaves.

use crate::resolver::MEDIA_EXTENSIONS;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub struct MediaCache {
    dir: PathBuf,
    evict: bool,
    refs: Mutex<HashMap<String, usize>>,
}

impl MediaCache {
    pub fn new(dir: impl Into<PathBuf>, evict: bool) -> Self {
        Self {
            dir: dir.into(),
            evict,
            refs: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Locate an existing media file for `id` by probing known extensions
    pub async fn locate(&self, id: &str) -> Option<PathBuf> {
        for ext in MEDIA_EXTENSIONS {
            let candidate = self.dir.join(format!("{id}.{ext}"));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn acquire(&self, id: &str) {
        if let Ok(mut refs) = self.refs.lock() {
            *refs.entry(id.to_string()).or_insert(0) += 1;
        }
    }

    /// Drop one reference; returns true when the file was deleted
    pub async fn release(&self, id: &str) -> bool {
        let last = match self.refs.lock() {
            Ok(mut refs) => match refs.get_mut(id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    refs.remove(id);
                    true
                }
                None => false,
            },
            Err(_) => false,
        };

        if !last || !self.evict {
            return false;
        }

        let mut removed = false;
        while let Some(path) = self.locate(id).await {
            // A new reference may have arrived while we were probing
            if self.references(id) > 0 {
                return removed;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Evicted cached media");
                    removed = true;
                }
                Err(e) => {
                    warn!(path = %path.display(), "Failed to evict cached media: {}", e);
                    break;
                }
            }
        }
        removed
    }

    pub fn references(&self, id: &str) -> usize {
        self.refs
            .lock()
            .ok()
            .and_then(|refs| refs.get(id).copied())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_locate_finds_known_extension() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::new(dir.path(), true);
        assert!(cache.locate("abc").await.is_none());

        std::fs::write(dir.path().join("abc.m4a"), b"x").unwrap();
        assert_eq!(cache.locate("abc").await, Some(dir.path().join("abc.m4a")));
    }

    #[tokio::test]
    async fn test_release_evicts_on_last_reference() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::new(dir.path(), true);
        let file = dir.path().join("abc.webm");
        std::fs::write(&file, b"x").unwrap();

        cache.acquire("abc");
        cache.acquire("abc");
        assert!(!cache.release("abc").await);
        assert!(file.exists());

        assert!(cache.release("abc").await);
        assert!(!file.exists());
        assert_eq!(cache.references("abc"), 0);
    }

    #[tokio::test]
    async fn test_release_keeps_file_when_eviction_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::new(dir.path(), false);
        let file = dir.path().join("abc.webm");
        std::fs::write(&file, b"x").unwrap();

        cache.acquire("abc");
        assert!(!cache.release("abc").await);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_release_unknown_id_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::new(dir.path(), true);
        assert!(!cache.release("nothing").await);
    }
}
