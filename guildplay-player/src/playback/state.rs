//! Mutable per-session state
//!
//! Guarded by a mutex that is never held across an await. `current` and
//! `state` only change together through the transition methods below, so
//! `current.is_some() == state.has_current()` holds after every call.

use super::queue::TrackQueue;
use crate::track::{Track, TrackMeta};
use guildplay_common::{FadeCurve, LoopMode, PlayerState};
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RadioState {
    pub enabled: bool,
    pub seed_id: Option<String>,
    /// Every id the filler has queued or seen played
    pub seen: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct CrossfadeSettings {
    pub enabled: bool,
    pub duration: Duration,
    pub steps: u32,
    pub curve: FadeCurve,
}

impl CrossfadeSettings {
    /// Enabled with a non-zero duration
    pub fn is_active(&self) -> bool {
        self.enabled && !self.duration.is_zero()
    }
}

#[derive(Debug)]
pub struct SessionState {
    state: PlayerState,
    current: Option<Track>,
    pub queue: TrackQueue,
    history: VecDeque<TrackMeta>,
    history_size: usize,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub radio: RadioState,
    pub crossfade: CrossfadeSettings,
    /// File name of the filler playing in `BackgroundMusic`
    pub background_file: Option<String>,
    /// Random loop chose the outgoing track over every crossfade partner
    replay_chosen: bool,
}

impl SessionState {
    pub fn new(
        queue_capacity: usize,
        history_size: usize,
        volume: f32,
        crossfade: CrossfadeSettings,
    ) -> Self {
        Self {
            state: PlayerState::Idle,
            current: None,
            queue: TrackQueue::new(queue_capacity),
            history: VecDeque::with_capacity(history_size),
            history_size,
            loop_mode: LoopMode::None,
            volume,
            radio: RadioState::default(),
            crossfade,
            background_file: None,
            replay_chosen: false,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn history(&self) -> impl DoubleEndedIterator<Item = &TrackMeta> + '_ {
        self.history.iter()
    }

    pub fn invariant_holds(&self) -> bool {
        self.current.is_some() == self.state.has_current()
    }

    /// `track` becomes current in `Loading`
    pub(crate) fn begin_loading(&mut self, track: Track) -> PlayerState {
        self.background_file = None;
        self.replay_chosen = false;
        self.current = Some(track);
        std::mem::replace(&mut self.state, PlayerState::Loading)
    }

    pub(crate) fn mark_playing(&mut self) -> PlayerState {
        if self.current.is_none() {
            return self.state;
        }
        std::mem::replace(&mut self.state, PlayerState::Playing)
    }

    pub(crate) fn mark_paused(&mut self) -> PlayerState {
        if self.state != PlayerState::Playing {
            return self.state;
        }
        std::mem::replace(&mut self.state, PlayerState::Paused)
    }

    /// Drop `current` and return to `Idle`
    pub(crate) fn go_idle(&mut self) -> (PlayerState, Option<Track>) {
        self.background_file = None;
        self.replay_chosen = false;
        let previous = self.current.take();
        (std::mem::replace(&mut self.state, PlayerState::Idle), previous)
    }

    /// Only valid with no current track
    pub(crate) fn enter_background(&mut self, file: String) -> PlayerState {
        if self.current.is_some() {
            return self.state;
        }
        self.background_file = Some(file);
        std::mem::replace(&mut self.state, PlayerState::BackgroundMusic)
    }

    /// Swap in the faded-in track after a crossfade
    pub(crate) fn replace_current(&mut self, track: Track) -> (PlayerState, Option<Track>) {
        let previous = self.current.replace(track);
        (std::mem::replace(&mut self.state, PlayerState::Playing), previous)
    }

    pub(crate) fn push_history(&mut self, meta: TrackMeta) {
        if self.history_size == 0 {
            return;
        }
        while self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(meta);
    }

    /// Pick the first track to play from an idle session
    pub(crate) fn select_initial<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Track> {
        match self.loop_mode {
            LoopMode::Random => self.queue.take_random(rng),
            _ => self.queue.pop_front(),
        }
    }

    /// Apply loop-mode policy to a finished track and pick what plays next
    ///
    /// Returns the next track and whether `finished` left the session.
    pub(crate) fn select_after<R: Rng + ?Sized>(
        &mut self,
        finished: Track,
        rng: &mut R,
    ) -> (Option<Track>, Option<Track>) {
        let replay_chosen = std::mem::take(&mut self.replay_chosen);
        match self.loop_mode {
            LoopMode::None => (self.queue.pop_front(), Some(finished)),
            LoopMode::Song => (Some(finished), None),
            LoopMode::Queue => (Some(self.queue.rotate(finished)), None),
            LoopMode::Random if replay_chosen => (Some(finished), None),
            LoopMode::Random => (Some(self.queue.rotate_random(finished, rng)), None),
        }
    }

    /// Pick the crossfade partner for the outgoing track, or None when the
    /// policy replays the outgoing track itself
    ///
    /// In `Random` the outgoing track is one of the `len + 1` candidates;
    /// when it wins, the choice is kept for the following
    /// [`select_after`](Self::select_after). The partner is removed from the
    /// queue and its slot stays reserved until
    /// [`finish_crossfade`](Self::finish_crossfade) or
    /// [`return_partner`](Self::return_partner).
    pub(crate) fn select_crossfade_partner<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Option<Track> {
        let partner = match self.loop_mode {
            LoopMode::Song => None,
            LoopMode::None | LoopMode::Queue => self.queue.pop_front(),
            LoopMode::Random => {
                if self.queue.is_empty() {
                    return None;
                }
                let index = rng.gen_range(0..=self.queue.len());
                if index == self.queue.len() {
                    self.replay_chosen = true;
                    return None;
                }
                self.queue.remove(index + 1).ok()
            }
        }?;
        self.queue.reserve_slot();
        Some(partner)
    }

    /// Put back the partner of a crossfade that did not complete
    pub(crate) fn return_partner(&mut self, partner: Track) {
        self.queue.release_slot();
        self.queue.push_front(partner);
    }

    /// Drop the reservation of a partner leaving the session
    pub(crate) fn discard_partner(&mut self) {
        self.queue.release_slot();
    }

    /// Requeue the outgoing track of a completed crossfade per loop mode
    ///
    /// Returns the outgoing track when it leaves the session.
    pub(crate) fn finish_crossfade(&mut self, outgoing: Track) -> Option<Track> {
        self.queue.release_slot();
        match self.loop_mode {
            LoopMode::Queue | LoopMode::Random => match self.queue.extend(vec![outgoing.clone()]) {
                Ok(overflow) => overflow.into_iter().next(),
                Err(_) => Some(outgoing),
            },
            LoopMode::None | LoopMode::Song => Some(outgoing),
        }
    }
}
