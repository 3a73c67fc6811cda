//! Bounded background downloads of upcoming tracks
//!
//! Each session owns one [`Preloader`]; the worker permits are shared by
//! every session so the global number of concurrent fetches stays bounded.
//! Failures are reported on a channel drained by the session's player loop,
//! which drops the offending entry from the queue.

use super::pipeline::DownloadPipeline;
use crate::track::{DownloadState, Track};
use guildplay_common::GuildId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

/// A preload that failed; the entry should leave the queue
#[derive(Debug, Clone)]
pub struct PreloadFailure {
    pub entry_id: Uuid,
    pub track_id: String,
    pub reason: String,
}

struct PendingPreload {
    generation: u64,
    token: CancellationToken,
    started: Arc<AtomicBool>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, PendingPreload>>>;

pub struct Preloader {
    guild: GuildId,
    pipeline: Arc<DownloadPipeline>,
    permits: Arc<Semaphore>,
    pending: PendingMap,
    generation: AtomicU64,
    cancel: CancellationToken,
    tracker: TaskTracker,
    failures: mpsc::UnboundedSender<PreloadFailure>,
}

impl Preloader {
    pub fn new(
        guild: GuildId,
        pipeline: Arc<DownloadPipeline>,
        permits: Arc<Semaphore>,
        failures: mpsc::UnboundedSender<PreloadFailure>,
    ) -> Self {
        Self {
            guild,
            pipeline,
            permits,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            failures,
        }
    }

    /// Schedule downloads for up to `limit` upcoming tracks
    ///
    /// Requests that have not started and are no longer among the upcoming
    /// tracks are cancelled. Returns the number of newly scheduled requests.
    pub fn preload(&self, upcoming: &[Track], limit: usize) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }

        let wanted: Vec<&Track> = upcoming
            .iter()
            .filter(|t| {
                !matches!(
                    t.download_state(),
                    DownloadState::Ready | DownloadState::Failed
                )
            })
            .take(limit)
            .collect();
        let wanted_ids: HashSet<Uuid> = wanted.iter().map(|t| t.entry_id).collect();

        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };

        pending.retain(|entry_id, p| {
            let keep = wanted_ids.contains(entry_id) || p.started.load(Ordering::SeqCst);
            if !keep {
                debug!(guild = self.guild, %entry_id, "Cancelling stale preload");
                p.token.cancel();
            }
            keep
        });

        let mut scheduled = 0;
        for track in wanted {
            if pending.contains_key(&track.entry_id) {
                continue;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst);
            let token = self.cancel.child_token();
            let started = Arc::new(AtomicBool::new(false));
            pending.insert(
                track.entry_id,
                PendingPreload {
                    generation,
                    token: token.clone(),
                    started: Arc::clone(&started),
                },
            );
            self.spawn_download(track.clone(), generation, token, started);
            scheduled += 1;
        }
        scheduled
    }

    fn spawn_download(
        &self,
        track: Track,
        generation: u64,
        token: CancellationToken,
        started: Arc<AtomicBool>,
    ) {
        let guild = self.guild;
        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let pending = Arc::clone(&self.pending);
        let session_cancel = self.cancel.clone();
        let failures = self.failures.clone();

        self.tracker.spawn(async move {
            let permit = tokio::select! {
                _ = token.cancelled() => {
                    forget(&pending, track.entry_id, generation);
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            started.store(true, Ordering::SeqCst);
            debug!(guild, track = %track.id(), "Preloading");

            let result = tokio::select! {
                _ = session_cancel.cancelled() => None,
                result = pipeline.download(&track) => Some(result),
            };
            drop(permit);
            forget(&pending, track.entry_id, generation);

            if let Some(Err(e)) = result {
                warn!(guild, track = %track.id(), "Preload failed: {}", e);
                let _ = failures.send(PreloadFailure {
                    entry_id: track.entry_id,
                    track_id: track.id().to_string(),
                    reason: e.to_string(),
                });
            }
        });
    }

    /// Entries with a scheduled or running request
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Cancel everything and wait for the workers to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

fn forget(pending: &PendingMap, entry_id: Uuid, generation: u64) {
    if let Ok(mut pending) = pending.lock() {
        if pending
            .get(&entry_id)
            .is_some_and(|p| p.generation == generation)
        {
            pending.remove(&entry_id);
        }
    }
}
