//! Radio filler
//!
//! Polls while radio mode is on and tops the queue up from the resolver's
//! recommendations. Ids in `RadioState::seen` are never queued again.

use super::session::SessionShared;
use crate::error::{Error, Result};
use crate::track::{Provenance, Track, TrackMeta};
use guildplay_common::GuildEvent;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Filler task body; exits when cancelled or radio mode is turned off
pub(crate) async fn run(shared: Arc<SessionShared>, cancel: CancellationToken) {
    let span = info_span!("radio", guild = shared.guild);
    async move {
        let mut ticker = interval(shared.config.radio_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Radio filler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !shared.lock().radio.enabled {
                break;
            }
            match top_up(&shared, &cancel).await {
                Ok(0) => {}
                Ok(added) => debug!(added, "Radio queue topped up"),
                Err(Error::Cancelled) => break,
                Err(e) => warn!("Radio top-up failed: {}", e),
            }
        }
        debug!("Radio filler stopped");
    }
    .instrument(span)
    .await
}

/// Append unseen recommendations until the queue reaches the threshold
///
/// Returns the number of tracks added.
async fn top_up(shared: &SessionShared, cancel: &CancellationToken) -> Result<usize> {
    let threshold = shared.config.radio.threshold;
    let seed = {
        let state = shared.lock();
        if !state.radio.enabled || state.queue.len() >= threshold {
            return Ok(0);
        }
        match state.current() {
            Some(current) => current.id().to_string(),
            None => match &state.radio.seed_id {
                Some(seed) => seed.clone(),
                None => return Ok(0),
            },
        }
    };

    let limit = shared.config.radio.fetch_limit;
    let related = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        related = shared.pipeline.resolver().related(&seed, limit) => related?,
    };

    let added = {
        let mut state = shared.lock();
        if !state.radio.enabled {
            return Ok(0);
        }
        let wanted = threshold.saturating_sub(state.queue.len());
        let accepted = accept_unseen(related, &state.radio.seen, &state.queue.ids(), wanted);
        for meta in &accepted {
            state.radio.seen.insert(meta.id.clone());
        }
        let tracks: Vec<Track> = accepted
            .into_iter()
            .map(|meta| Track::new(meta, Provenance::Radio))
            .collect();
        if tracks.is_empty() {
            return Ok(0);
        }
        let overflow = state.queue.extend(tracks.clone())?;
        let added = tracks[..tracks.len() - overflow.len()].to_vec();
        for track in &added {
            shared.cache().acquire(track.id());
        }
        added
    };

    let ids: Vec<String> = added.iter().map(|t| t.id().to_string()).collect();
    info!(seed = %seed, added = ?ids, "Radio extended queue");
    shared.events.emit_lossy(GuildEvent::RadioExtended {
        guild_id: shared.guild,
        added: ids,
        timestamp: chrono::Utc::now(),
    });
    shared.emit_queue_changed();
    shared.preload_upcoming();
    shared.wake();
    Ok(added.len())
}

/// Keep at most `wanted` recommendations not seen or queued, without
/// duplicates
fn accept_unseen(
    related: Vec<TrackMeta>,
    seen: &HashSet<String>,
    queued: &[String],
    wanted: usize,
) -> Vec<TrackMeta> {
    let mut taken: HashSet<String> = queued.iter().cloned().collect();
    related
        .into_iter()
        .filter(|meta| !seen.contains(&meta.id) && taken.insert(meta.id.clone()))
        .take(wanted)
        .collect()
}
