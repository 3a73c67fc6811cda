//! Query resolution and deduplicated media fetches

use super::cache::MediaCache;
use crate::error::{Error, Result};
use crate::resolver::{Fetcher, QueryKind, Resolver};
use crate::track::{DownloadState, Provenance, Track, TrackMeta};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a failed fetch, shared by every caller awaiting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    Timeout(Duration),
    Fetch(String),
    NoMedia,
}

impl From<DownloadFailure> for Error {
    fn from(failure: DownloadFailure) -> Self {
        match failure {
            DownloadFailure::Timeout(after) => Error::DownloadTimeout(after),
            DownloadFailure::Fetch(reason) => Error::Download(reason),
            DownloadFailure::NoMedia => Error::Download("fetch produced no media file".to_string()),
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<PathBuf, DownloadFailure>>>;

/// Resolves queries and fetches media, one fetch per source id at a time
pub struct DownloadPipeline {
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<MediaCache>,
    timeout: Duration,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl DownloadPipeline {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<MediaCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            cache,
            timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// Resolve a query into tracks without queueing them
    ///
    /// Direct URLs and searches yield one track; playlists yield every
    /// entry with minimal metadata.
    pub async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Resolution("empty query".to_string()));
        }

        let kind = QueryKind::classify(query);
        let (metas, provenance) = match kind {
            QueryKind::Playlist => (
                self.resolver.resolve_playlist(query).await,
                Provenance::Playlist,
            ),
            QueryKind::Direct => (self.resolver.resolve(query).await, Provenance::Direct),
            QueryKind::Search => (self.resolver.resolve(query).await, Provenance::Search),
        };
        let mut metas = metas.map_err(|e| match e {
            Error::Resolution(_) => e,
            other => Error::Resolution(other.to_string()),
        })?;

        if kind != QueryKind::Playlist {
            metas.truncate(1);
        }
        if metas.is_empty() {
            return Err(Error::Resolution(format!("no results for '{query}'")));
        }

        debug!(query, ?kind, count = metas.len(), "Resolved query");
        Ok(metas
            .into_iter()
            .map(|meta| Track::new(meta, provenance))
            .collect())
    }

    /// Ensure the track's media is available locally
    ///
    /// Concurrent callers for the same source id share one fetch and all
    /// observe its result. A track that already failed is not refetched.
    pub async fn download(&self, track: &Track) -> Result<PathBuf> {
        match track.download_state() {
            DownloadState::Ready => {
                if let Some(path) = track.local_path() {
                    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        return Ok(path);
                    }
                }
            }
            DownloadState::Failed => {
                return Err(Error::Download(format!(
                    "{} failed to download earlier",
                    track.id()
                )));
            }
            DownloadState::Unrequested | DownloadState::InFlight => {}
        }

        if let Some(path) = self.cache.locate(track.id()).await {
            track.mark_ready(path.clone());
            return Ok(path);
        }

        let fetch = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| Error::Internal("download map poisoned".to_string()))?;
            in_flight
                .entry(track.id().to_string())
                .or_insert_with(|| self.start_fetch(track.meta.clone()))
                .clone()
        };
        track.mark_in_flight();

        let result = fetch.clone().await;

        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight
                .get(track.id())
                .is_some_and(|current| current.ptr_eq(&fetch))
            {
                in_flight.remove(track.id());
            }
        }

        match result {
            Ok(path) => {
                track.mark_ready(path.clone());
                Ok(path)
            }
            Err(failure) => {
                track.mark_failed();
                Err(failure.into())
            }
        }
    }

    /// Number of fetches currently running
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn start_fetch(&self, meta: TrackMeta) -> SharedFetch {
        let fetcher = Arc::clone(&self.fetcher);
        let cache = Arc::clone(&self.cache);
        let timeout = self.timeout;

        async move {
            info!(track = %meta.id, title = %meta.title, "Download started");
            let dir = cache.dir().to_path_buf();
            let outcome = match tokio::time::timeout(timeout, fetcher.fetch(&meta, &dir)).await {
                Err(_) => Err(DownloadFailure::Timeout(timeout)),
                Ok(Err(e)) => Err(DownloadFailure::Fetch(e.to_string())),
                Ok(Ok(())) => cache.locate(&meta.id).await.ok_or(DownloadFailure::NoMedia),
            };
            match &outcome {
                Ok(path) => info!(track = %meta.id, path = %path.display(), "Download finished"),
                Err(failure) => warn!(track = %meta.id, ?failure, "Download failed"),
            }
            outcome
        }
        .boxed()
        .shared()
    }
}
