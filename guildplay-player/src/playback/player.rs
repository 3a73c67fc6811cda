//! Player loop
//!
//! One task per session and the only writer of `current` and `state`.
//! Every wait is a `select!` over the control channel, preload failures,
//! the active stream's completion, the crossfade trigger, a running
//! crossfade and the background filler, so intents are served while a
//! track loads or plays.
//!
//! Per-track failures are absorbed here: the track is dropped, an event is
//! published and the next candidate is loaded.

use super::crossfade::{CrossfadeEngine, CrossfadeOutcome, CrossfadeRequest};
use super::fade::{fade_stream, Ramp};
use super::fallback::BackgroundRotation;
use super::session::{Control, SessionShared, TaskSlot};
use super::state::SessionState;
use crate::download::PreloadFailure;
use crate::error::{Error, Result};
use crate::track::{DownloadState, Track};
use crate::transport::{Completion, MediaSource, StreamEnd, StreamId};
use guildplay_common::{FadeCurve, GuildEvent, GuildId, LoopMode, PlayerState};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The stream of the current track
struct ActiveStream {
    stream: StreamId,
    completion: Completion,
    duration: Duration,
    started_at: Instant,
    paused_total: Duration,
    paused_since: Option<Instant>,
    /// Set after a failed crossfade; this track ends with a hard cut
    crossfade_blocked: bool,
}

impl ActiveStream {
    fn new(stream: StreamId, completion: Completion, duration: Duration) -> Self {
        Self {
            stream,
            completion,
            duration,
            started_at: Instant::now(),
            paused_total: Duration::ZERO,
            paused_since: None,
            crossfade_blocked: false,
        }
    }

    fn elapsed(&self) -> Duration {
        let paused_now = self
            .paused_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        self.started_at
            .elapsed()
            .saturating_sub(self.paused_total + paused_now)
    }

    /// None for unbounded media
    fn remaining(&self) -> Option<Duration> {
        if self.duration.is_zero() {
            None
        } else {
            Some(self.duration.saturating_sub(self.elapsed()))
        }
    }

    fn fade_deadline(&self, fade: Duration) -> Option<Instant> {
        if self.crossfade_blocked
            || self.paused_since.is_some()
            || self.duration.is_zero()
            || self.duration <= fade
        {
            return None;
        }
        Some(self.started_at + self.paused_total + (self.duration - fade))
    }

    fn pause(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
    }

    fn resume(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }
}

struct RunningCrossfade {
    incoming: Track,
    result: oneshot::Receiver<Result<CrossfadeOutcome>>,
    finish: CancellationToken,
}

struct Filler {
    stream: StreamId,
    completion: Completion,
    gain: f32,
}

/// Why a loading track was abandoned
enum Interrupt {
    Skip,
    Stop(oneshot::Sender<Result<()>>),
    Shutdown,
}

enum StartError {
    Failed(Error),
    Interrupted(Interrupt),
}

/// Why the current track is being replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    Completed,
    Skipped,
    Failed,
}

enum Event {
    Shutdown,
    Control(Control),
    PreloadFailed(PreloadFailure),
    TrackEnded(StreamEnd),
    FadeDue,
    CrossfadeDone(Result<CrossfadeOutcome>),
    FillerEnded,
}

pub(crate) struct Player {
    shared: Arc<SessionShared>,
    guild: GuildId,
    control_rx: mpsc::UnboundedReceiver<Control>,
    failures_rx: mpsc::UnboundedReceiver<PreloadFailure>,
    engine: CrossfadeEngine,
    background: BackgroundRotation,
    cancel: CancellationToken,
    rng: StdRng,
    active: Option<ActiveStream>,
    crossfade: Option<RunningCrossfade>,
    filler: Option<Filler>,
    transport_paused: bool,
    idle_generation: u64,
    idle_armed: bool,
    /// Set after a transport failure; cleared by the next intent
    stalled: bool,
}

impl Player {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        control_rx: mpsc::UnboundedReceiver<Control>,
        failures_rx: mpsc::UnboundedReceiver<PreloadFailure>,
        engine: CrossfadeEngine,
        background: BackgroundRotation,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            guild: shared.guild,
            shared,
            control_rx,
            failures_rx,
            engine,
            background,
            cancel,
            rng: StdRng::from_entropy(),
            active: None,
            crossfade: None,
            filler: None,
            transport_paused: false,
            idle_generation: 0,
            idle_armed: false,
            stalled: false,
        }
    }

    pub(crate) async fn run(mut self) {
        let span = info_span!("player", guild = self.guild);
        async move {
            info!("Player loop started");
            while !self.cancel.is_cancelled() {
                match self.iterate().await {
                    Ok(()) => {}
                    Err(Error::Cancelled) if self.cancel.is_cancelled() => break,
                    Err(e) => {
                        error!("Player iteration failed: {}", e);
                        self.recover().await;
                    }
                }
            }
            self.shared.tasks.crossfade.shutdown(self.guild, "crossfade").await;
            info!("Player loop stopped");
        }
        .instrument(span)
        .await
    }

    async fn iterate(&mut self) -> Result<()> {
        if self.active.is_none() && self.crossfade.is_none() && !self.stalled {
            let next = {
                let mut state = self.shared.lock();
                match state.state() {
                    PlayerState::Idle | PlayerState::BackgroundMusic => {
                        state.select_initial(&mut self.rng)
                    }
                    _ => None,
                }
            };
            if let Some(track) = next {
                self.shared.emit_queue_changed();
                return self.play_track(track).await;
            }
            self.arm_idle_timer();
        }

        let event = self.next_event().await;
        self.handle_event(event).await
    }

    async fn next_event(&mut self) -> Event {
        let fade_due = self.fade_deadline();
        let crossfading = self.crossfade.is_some();

        tokio::select! {
            _ = self.cancel.cancelled() => Event::Shutdown,
            Some(control) = self.control_rx.recv() => Event::Control(control),
            Some(failure) = self.failures_rx.recv() => Event::PreloadFailed(failure),
            end = stream_end(self.active.as_mut().map(|a| &mut a.completion)), if !crossfading => {
                Event::TrackEnded(end)
            }
            _ = sleep_until(fade_due) => Event::FadeDue,
            result = crossfade_result(&mut self.crossfade) => Event::CrossfadeDone(result),
            _ = stream_end(self.filler.as_mut().map(|f| &mut f.completion)) => Event::FillerEnded,
        }
    }

    async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Shutdown => Ok(()),
            Event::Control(control) => self.handle_control(control).await,
            Event::PreloadFailed(failure) => {
                self.drop_failed_entry(failure).await;
                Ok(())
            }
            Event::TrackEnded(end) => self.on_track_end(end).await,
            Event::FadeDue => {
                if !self.start_crossfade().await? {
                    // Conditions changed since the deadline was computed
                    if let Some(active) = self.active.as_mut() {
                        active.crossfade_blocked = true;
                    }
                }
                Ok(())
            }
            Event::CrossfadeDone(result) => self.finish_crossfade(result).await,
            Event::FillerEnded => self.next_filler().await,
        }
    }

    async fn handle_control(&mut self, control: Control) -> Result<()> {
        if !matches!(control, Control::IdleElapsed(_)) {
            self.disarm_idle_timer();
        }
        match control {
            Control::Wake => {
                self.stalled = false;
                self.shared.preload_upcoming();
                Ok(())
            }
            Control::ApplyVolume => self.apply_volume().await,
            Control::IdleElapsed(generation) => {
                if !self.idle_armed || generation != self.idle_generation {
                    return Ok(());
                }
                self.idle_armed = false;
                self.shared.tasks.idle_timer.take();
                self.start_background().await
            }
            Control::Pause { reply } => {
                let result = self.pause().await;
                let _ = reply.send(result);
                Ok(())
            }
            Control::Resume { reply } => {
                let result = self.resume().await;
                let _ = reply.send(result);
                Ok(())
            }
            Control::Skip { to, reply } => self.skip(to, reply).await,
            Control::Stop { reply } => {
                self.stop_all().await;
                let _ = reply.send(Ok(()));
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Track lifecycle
    // ---------------------------------------------------------------------

    /// Load and start `first`, moving on to further candidates while
    /// tracks fail
    async fn play_track(&mut self, first: Track) -> Result<()> {
        let mut candidate = Some(first);

        while let Some(track) = candidate.take() {
            self.disarm_idle_timer();
            if self.filler.is_some() {
                self.stop_filler().await?;
            }
            self.transition(|s| s.begin_loading(track.clone()));
            {
                let mut state = self.shared.lock();
                if state.radio.enabled {
                    state.radio.seen.insert(track.id().to_string());
                }
            }
            self.shared.preload_upcoming();
            info!(track = %track.id(), title = %track.title(), "Loading track");

            match self.start_stream(&track).await {
                Ok(active) => {
                    self.active = Some(active);
                    self.transition(|s| s.mark_playing());
                    self.emit_started(&track, false);
                    return Ok(());
                }
                Err(StartError::Interrupted(Interrupt::Shutdown)) => return Err(Error::Cancelled),
                Err(StartError::Interrupted(Interrupt::Stop(reply))) => {
                    self.stop_all().await;
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }
                Err(StartError::Interrupted(Interrupt::Skip)) => {
                    info!(track = %track.id(), "Skipped while loading");
                    candidate = self.replace_current(Advance::Skipped).await;
                }
                Err(StartError::Failed(e)) if e.is_track_failure() => {
                    warn!(track = %track.id(), "Dropping track: {}", e);
                    self.emit_failed(&track, &e);
                    candidate = self.replace_current(Advance::Failed).await;
                }
                Err(StartError::Failed(e)) => {
                    error!(track = %track.id(), "Playback could not start: {}", e);
                    self.emit_failed(&track, &e);
                    let previous = self.go_idle();
                    self.shared.release_all(previous.into_iter().collect()).await;
                    self.stalled = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Wait for the track's media, then hand it to the transport
    async fn start_stream(&mut self, track: &Track) -> std::result::Result<ActiveStream, StartError> {
        let pipeline = Arc::clone(&self.shared.pipeline);
        let fetch_track = track.clone();
        let download = async move { pipeline.download(&fetch_track).await };
        tokio::pin!(download);

        let path = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(StartError::Interrupted(Interrupt::Shutdown));
                }
                result = &mut download => break result.map_err(StartError::Failed)?,
                Some(control) = self.control_rx.recv() => {
                    if let Some(interrupt) = self.control_while_loading(control).await {
                        return Err(StartError::Interrupted(interrupt));
                    }
                }
                Some(failure) = self.failures_rx.recv() => self.drop_failed_entry(failure).await,
            }
        };

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StartError::Failed(Error::Decode(format!(
                "media file missing: {}",
                path.display()
            ))));
        }

        if self.transport_paused {
            self.shared
                .transport
                .resume()
                .await
                .map_err(StartError::Failed)?;
            self.transport_paused = false;
        }

        let volume = self.shared.lock().volume;
        let source = MediaSource {
            path,
            duration: track.duration(),
            label: track.title().to_string(),
        };
        let startup = self.shared.config.startup_timeout();
        let started = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(StartError::Interrupted(Interrupt::Shutdown));
            }
            started = tokio::time::timeout(startup, self.shared.transport.play(source, volume)) => started,
        };

        match started {
            Ok(Ok((stream, completion))) => {
                Ok(ActiveStream::new(stream, completion, track.duration()))
            }
            Ok(Err(e)) => Err(StartError::Failed(e)),
            Err(_) => Err(StartError::Failed(Error::Decode(format!(
                "stream did not start within {:?}",
                startup
            )))),
        }
    }

    /// Serve an intent that arrives while a track is loading
    async fn control_while_loading(&mut self, control: Control) -> Option<Interrupt> {
        match control {
            Control::Wake => {
                self.stalled = false;
                self.shared.preload_upcoming();
                None
            }
            Control::ApplyVolume | Control::IdleElapsed(_) => None,
            Control::Pause { reply } | Control::Resume { reply } => {
                let _ = reply.send(Err(Error::InvalidState(
                    "track is still loading".to_string(),
                )));
                None
            }
            Control::Skip { to, reply } => {
                if let Some(position) = to {
                    if let Err(e) = self.reposition(position).await {
                        let _ = reply.send(Err(e));
                        return None;
                    }
                }
                let _ = reply.send(Ok(()));
                Some(Interrupt::Skip)
            }
            Control::Stop { reply } => Some(Interrupt::Stop(reply)),
        }
    }

    /// Apply loop-mode policy to the current track and pick its successor
    ///
    /// Returns the next track to load, or None after moving to `Idle`.
    async fn replace_current(&mut self, reason: Advance) -> Option<Track> {
        let (finished, next, left) = {
            let mut state = self.shared.lock();
            let finished = state.current().cloned()?;
            if reason != Advance::Failed {
                state.push_history(finished.meta.clone());
            }
            let (next, left) = match reason {
                Advance::Failed => (state.select_initial(&mut self.rng), Some(finished.clone())),
                Advance::Skipped if state.loop_mode == LoopMode::Song => {
                    (state.queue.pop_front(), Some(finished.clone()))
                }
                Advance::Skipped | Advance::Completed => {
                    state.select_after(finished.clone(), &mut self.rng)
                }
            };
            (finished, next, left)
        };

        if reason != Advance::Failed {
            self.emit(GuildEvent::TrackFinished {
                guild_id: self.guild,
                track_id: finished.id().to_string(),
                completed: reason == Advance::Completed,
                timestamp: chrono::Utc::now(),
            });
        }

        match &next {
            Some(track) => {
                self.transition(|s| s.begin_loading(track.clone()));
            }
            None => {
                self.go_idle();
            }
        }
        if let Some(left) = left {
            self.shared.release_all(vec![left]).await;
        }
        self.shared.emit_queue_changed();
        next
    }

    async fn on_track_end(&mut self, end: StreamEnd) -> Result<()> {
        self.active = None;
        let reason = match &end {
            StreamEnd::Finished => Advance::Completed,
            StreamEnd::Stopped => Advance::Skipped,
            StreamEnd::Error(e) => {
                warn!("Stream ended with error: {}", e);
                Advance::Completed
            }
        };
        debug!(?end, "Track ended");
        match self.replace_current(reason).await {
            Some(next) => self.play_track(next).await,
            None => Ok(()),
        }
    }

    async fn skip(&mut self, to: Option<usize>, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        if let Some(running) = &self.crossfade {
            running.finish.cancel();
            let _ = reply.send(Ok(()));
            return Ok(());
        }

        if self.active.is_none() {
            if self.filler.is_some() {
                let _ = reply.send(Ok(()));
                return self.next_filler().await;
            }
            let _ = reply.send(Err(Error::InvalidState("nothing is playing".to_string())));
            return Ok(());
        }

        if let Some(position) = to {
            if let Err(e) = self.reposition(position).await {
                let _ = reply.send(Err(e));
                return Ok(());
            }
        }
        info!("Skipping current track");

        if self.start_crossfade().await? {
            let _ = reply.send(Ok(()));
            return Ok(());
        }

        if let Some(active) = self.active.take() {
            if let Err(e) = self.shared.transport.stop(active.stream).await {
                warn!("Failed to stop skipped stream: {}", e);
            }
        }
        let next = self.replace_current(Advance::Skipped).await;
        let _ = reply.send(Ok(()));
        match next {
            Some(track) => self.play_track(track).await,
            None => Ok(()),
        }
    }

    /// Make a 1-based queue position the head
    async fn reposition(&mut self, position: usize) -> Result<()> {
        let dropped = {
            let mut state = self.shared.lock();
            let keep = matches!(state.loop_mode, LoopMode::Queue | LoopMode::Random);
            state.queue.skip_to(position, keep)?
        };
        self.shared.release_all(dropped).await;
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        if self.crossfade.is_some() {
            return Err(Error::InvalidState("crossfade in progress".to_string()));
        }
        if self.active.is_none() || self.shared.lock().state() != PlayerState::Playing {
            return Err(Error::InvalidState("nothing is playing".to_string()));
        }
        self.shared.transport.pause().await?;
        self.transport_paused = true;
        if let Some(active) = self.active.as_mut() {
            active.pause();
        }
        self.transition(|s| s.mark_paused());
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        if self.shared.lock().state() != PlayerState::Paused {
            return Err(Error::InvalidState("playback is not paused".to_string()));
        }
        self.shared.transport.resume().await?;
        self.transport_paused = false;
        if let Some(active) = self.active.as_mut() {
            active.resume();
        }
        self.transition(|s| s.mark_playing());
        Ok(())
    }

    /// Stop every stream, clear the queue and turn radio off
    async fn stop_all(&mut self) {
        let mut leaving = Vec::new();

        if let Some(running) = self.crossfade.take() {
            self.shared.tasks.crossfade.shutdown(self.guild, "crossfade").await;
            self.shared.lock().discard_partner();
            leaving.push(running.incoming);
        }
        if let Some(active) = self.active.take() {
            if let Err(e) = self.shared.transport.stop(active.stream).await {
                warn!("Failed to stop stream: {}", e);
            }
        }
        if let Some(filler) = self.filler.take() {
            let _ = self.shared.transport.stop(filler.stream).await;
            self.emit(GuildEvent::BackgroundStopped {
                guild_id: self.guild,
                timestamp: chrono::Utc::now(),
            });
        }
        if self.transport_paused {
            let _ = self.shared.transport.resume().await;
            self.transport_paused = false;
        }

        self.shared.lock().radio.enabled = false;
        self.shared.tasks.radio.shutdown(self.guild, "radio").await;

        leaving.extend(self.shared.lock().queue.clear());
        leaving.extend(self.go_idle());
        self.shared.release_all(leaving).await;
        self.shared.emit_queue_changed();
        info!("Playback stopped");
    }

    async fn drop_failed_entry(&mut self, failure: PreloadFailure) {
        let removed = self.shared.lock().queue.remove_entry(failure.entry_id);
        if let Some(track) = removed {
            warn!(track = %track.id(), "Removed from queue after failed preload: {}", failure.reason);
            self.emit(GuildEvent::TrackFailed {
                guild_id: self.guild,
                track_id: track.id().to_string(),
                reason: failure.reason,
                timestamp: chrono::Utc::now(),
            });
            self.shared.release_all(vec![track]).await;
            self.shared.emit_queue_changed();
            self.shared.preload_upcoming();
        }
    }

    async fn apply_volume(&mut self) -> Result<()> {
        if self.crossfade.is_some() {
            // Applied when the crossfade completes
            return Ok(());
        }
        let volume = self.shared.lock().volume;
        if let Some(active) = &self.active {
            if let Err(e) = self.shared.transport.set_gain(active.stream, volume).await {
                debug!("Volume not applied: {}", e);
            }
        }
        if let Some(filler) = self.filler.as_mut() {
            filler.gain = volume * self.shared.config.background.gain;
            if let Err(e) = self.shared.transport.set_gain(filler.stream, filler.gain).await {
                debug!("Background volume not applied: {}", e);
            }
        }
        Ok(())
    }

    /// Put the session back in a consistent `Idle` state after an
    /// unexpected error
    async fn recover(&mut self) {
        let mut leaving = Vec::new();
        if let Some(running) = self.crossfade.take() {
            self.shared.tasks.crossfade.shutdown(self.guild, "crossfade").await;
            self.shared.lock().discard_partner();
            leaving.push(running.incoming);
        }
        if let Some(active) = self.active.take() {
            let _ = self.shared.transport.stop(active.stream).await;
        }
        if let Some(filler) = self.filler.take() {
            let _ = self.shared.transport.stop(filler.stream).await;
        }
        leaving.extend(self.go_idle());
        self.shared.release_all(leaving).await;
    }

    // ---------------------------------------------------------------------
    // Crossfade
    // ---------------------------------------------------------------------

    fn fade_deadline(&self) -> Option<Instant> {
        if self.crossfade.is_some() {
            return None;
        }
        let active = self.active.as_ref()?;
        let state = self.shared.lock();
        if state.state() != PlayerState::Playing
            || !state.crossfade.is_active()
            || state.loop_mode == LoopMode::Song
            || state.queue.is_empty()
        {
            return None;
        }
        active.fade_deadline(state.crossfade.duration)
    }

    /// Hand the transition to the crossfade engine; false when a crossfade
    /// is not possible right now
    async fn start_crossfade(&mut self) -> Result<bool> {
        if self.crossfade.is_some() || self.cancel.is_cancelled() {
            return Ok(false);
        }
        let Some((outgoing, remaining)) = self.active.as_ref().map(|a| (a.stream, a.remaining()))
        else {
            return Ok(false);
        };

        let (incoming, outgoing_id, settings, fade, volume) = {
            let mut state = self.shared.lock();
            if state.state() != PlayerState::Playing || !state.crossfade.is_active() {
                return Ok(false);
            }
            let fade = match remaining {
                Some(left) => state.crossfade.duration.min(left),
                None => state.crossfade.duration,
            };
            if fade.is_zero() {
                return Ok(false);
            }
            let Some(outgoing_id) = state.current().map(|t| t.id().to_string()) else {
                return Ok(false);
            };
            let Some(incoming) = state.select_crossfade_partner(&mut self.rng) else {
                return Ok(false);
            };
            (incoming, outgoing_id, state.crossfade.clone(), fade, state.volume)
        };

        self.emit(GuildEvent::CrossfadeStarted {
            guild_id: self.guild,
            outgoing_id,
            incoming_id: incoming.id().to_string(),
            duration_ms: fade.as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });
        self.shared.emit_queue_changed();

        let request = CrossfadeRequest {
            guild: self.guild,
            outgoing,
            incoming: incoming.clone(),
            duration: fade,
            steps: settings.steps,
            curve: settings.curve,
            volume,
            startup_timeout: self.shared.config.startup_timeout(),
        };
        let cancel = self.cancel.child_token();
        let finish = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();
        let engine = self.engine.clone();
        let (task_cancel, task_finish) = (cancel.clone(), finish.clone());
        let handle = tokio::spawn(
            async move {
                let result = engine.run(request, &task_cancel, &task_finish).await;
                let _ = result_tx.send(result);
            }
            .instrument(info_span!("crossfade", guild = self.guild)),
        );
        if let Some(stale) = self
            .shared
            .tasks
            .crossfade
            .replace(TaskSlot::new(cancel, handle))
        {
            stale.shutdown(self.guild, "crossfade").await;
        }

        self.crossfade = Some(RunningCrossfade {
            incoming,
            result: result_rx,
            finish,
        });
        self.shared.preload_upcoming();
        Ok(true)
    }

    async fn finish_crossfade(&mut self, result: Result<CrossfadeOutcome>) -> Result<()> {
        let Some(running) = self.crossfade.take() else {
            return Ok(());
        };
        self.shared.tasks.crossfade.shutdown(self.guild, "crossfade").await;

        match result {
            Ok(outcome) => {
                // The engine already stopped the outgoing stream
                self.active = None;
                let (old, new, previous, left) = {
                    let mut state = self.shared.lock();
                    let (old, previous) = state.replace_current(outcome.incoming.clone());
                    let left = match previous.clone() {
                        Some(p) => {
                            state.push_history(p.meta.clone());
                            state.finish_crossfade(p)
                        }
                        None => {
                            state.discard_partner();
                            None
                        }
                    };
                    if state.radio.enabled {
                        state.radio.seen.insert(outcome.incoming.id().to_string());
                    }
                    (old, state.state(), previous, left)
                };
                self.report_transition(old, new);

                if let Some(previous) = previous {
                    self.emit(GuildEvent::TrackFinished {
                        guild_id: self.guild,
                        track_id: previous.id().to_string(),
                        completed: true,
                        timestamp: chrono::Utc::now(),
                    });
                }
                if let Some(left) = left {
                    self.shared.release_all(vec![left]).await;
                }

                self.active = Some(ActiveStream::new(
                    outcome.stream,
                    outcome.completion,
                    outcome.incoming.duration(),
                ));
                self.emit(GuildEvent::CrossfadeCompleted {
                    guild_id: self.guild,
                    incoming_id: outcome.incoming.id().to_string(),
                    timestamp: chrono::Utc::now(),
                });
                self.emit_started(&outcome.incoming, true);
                self.shared.emit_queue_changed();
                self.shared.preload_upcoming();
                self.apply_volume().await
            }
            Err(Error::Cancelled) => {
                self.shared.lock().return_partner(running.incoming);
                Ok(())
            }
            Err(e) => {
                warn!("Crossfade failed, falling back to a hard cut: {}", e);
                if let Some(active) = self.active.as_mut() {
                    active.crossfade_blocked = true;
                }
                if running.incoming.download_state() == DownloadState::Failed {
                    self.shared.lock().discard_partner();
                    self.emit_failed(&running.incoming, &e);
                    self.shared.release_all(vec![running.incoming]).await;
                } else {
                    self.shared.lock().return_partner(running.incoming);
                }
                self.shared.emit_queue_changed();
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Background music
    // ---------------------------------------------------------------------

    fn arm_idle_timer(&mut self) {
        if self.idle_armed
            || self.filler.is_some()
            || self.background.is_empty()
            || !self.shared.config.background.enabled
        {
            return;
        }
        {
            let state = self.shared.lock();
            if state.state() != PlayerState::Idle || !state.queue.is_empty() {
                return;
            }
        }

        self.idle_generation += 1;
        let generation = self.idle_generation;
        let delay = self.shared.config.idle_delay();
        let control = self.shared.control.clone();
        let cancel = self.cancel.child_token();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = control.send(Control::IdleElapsed(generation));
                }
            }
        });
        if let Some(previous) = self
            .shared
            .tasks
            .idle_timer
            .replace(TaskSlot::new(cancel, handle))
        {
            previous.cancel();
        }
        self.idle_armed = true;
        debug!(delay_ms = delay.as_millis() as u64, "Idle timer armed");
    }

    fn disarm_idle_timer(&mut self) {
        if !self.idle_armed {
            return;
        }
        self.idle_armed = false;
        if let Some(slot) = self.shared.tasks.idle_timer.take() {
            slot.cancel();
        }
    }

    async fn start_background(&mut self) -> Result<()> {
        {
            let state = self.shared.lock();
            if state.state() != PlayerState::Idle || !state.queue.is_empty() {
                return Ok(());
            }
        }
        let Some((stream, completion, label)) = self.play_next_filler(0.0).await else {
            return Ok(());
        };
        let target = self.shared.lock().volume * self.shared.config.background.gain;

        self.transition(|s| s.enter_background(label.clone()));
        info!(file = %label, "Background music started");
        self.emit(GuildEvent::BackgroundStarted {
            guild_id: self.guild,
            file: label,
            timestamp: chrono::Utc::now(),
        });
        self.filler = Some(Filler {
            stream,
            completion,
            gain: target,
        });

        let ramp = Ramp::new(
            self.shared.config.background_fade(),
            self.shared.config.background.steps,
        );
        fade_stream(
            self.shared.transport.as_ref(),
            stream,
            0.0,
            target,
            ramp,
            FadeCurve::Linear,
            &self.cancel,
        )
        .await
    }

    /// Fade the filler out and stop it; completes before returning
    async fn stop_filler(&mut self) -> Result<()> {
        let Some(filler) = self.filler.take() else {
            return Ok(());
        };
        let ramp = Ramp::new(
            self.shared.config.background_fade(),
            self.shared.config.background.steps,
        );
        let faded = fade_stream(
            self.shared.transport.as_ref(),
            filler.stream,
            filler.gain,
            0.0,
            ramp,
            FadeCurve::Linear,
            &self.cancel,
        )
        .await;
        if let Err(e) = self.shared.transport.stop(filler.stream).await {
            warn!("Failed to stop background music: {}", e);
        }
        info!("Background music stopped");
        self.emit(GuildEvent::BackgroundStopped {
            guild_id: self.guild,
            timestamp: chrono::Utc::now(),
        });

        match faded {
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                debug!("Background fade-out cut short: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Advance the filler rotation after the previous file ended or was
    /// skipped
    async fn next_filler(&mut self) -> Result<()> {
        let gain = match self.filler.take() {
            Some(previous) => {
                let _ = self.shared.transport.stop(previous.stream).await;
                previous.gain
            }
            None => self.shared.lock().volume * self.shared.config.background.gain,
        };

        match self.play_next_filler(gain).await {
            Some((stream, completion, label)) => {
                self.shared.lock().background_file = Some(label.clone());
                debug!(file = %label, "Next background track");
                self.filler = Some(Filler {
                    stream,
                    completion,
                    gain,
                });
            }
            None => {
                self.go_idle();
                self.emit(GuildEvent::BackgroundStopped {
                    guild_id: self.guild,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn play_next_filler(&mut self, gain: f32) -> Option<(StreamId, Completion, String)> {
        let file = self.background.next_file()?;
        let label = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let source = MediaSource {
            path: file,
            duration: Duration::ZERO,
            label: label.clone(),
        };
        match self.shared.transport.play(source, gain).await {
            Ok((stream, completion)) => Some((stream, completion, label)),
            Err(e) => {
                warn!(file = %label, "Background music failed to start: {}", e);
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // State and events
    // ---------------------------------------------------------------------

    fn transition(&self, change: impl FnOnce(&mut SessionState) -> PlayerState) {
        let (old, new) = {
            let mut state = self.shared.lock();
            let old = change(&mut state);
            (old, state.state())
        };
        self.report_transition(old, new);
    }

    /// Drop `current` and enter `Idle`; returns the dropped track
    fn go_idle(&self) -> Option<Track> {
        let (old, previous) = self.shared.lock().go_idle();
        self.report_transition(old, PlayerState::Idle);
        previous
    }

    fn report_transition(&self, old: PlayerState, new: PlayerState) {
        if old == new {
            return;
        }
        info!(%old, %new, "State changed");
        self.emit(GuildEvent::StateChanged {
            guild_id: self.guild,
            old_state: old,
            new_state: new,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_started(&self, track: &Track, crossfaded: bool) {
        info!(track = %track.id(), title = %track.title(), crossfaded, "Track started");
        self.emit(GuildEvent::TrackStarted {
            guild_id: self.guild,
            track_id: track.id().to_string(),
            title: track.title().to_string(),
            crossfaded,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_failed(&self, track: &Track, error: &Error) {
        self.emit(GuildEvent::TrackFailed {
            guild_id: self.guild,
            track_id: track.id().to_string(),
            reason: error.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit(&self, event: GuildEvent) {
        self.shared.events.emit_lossy(event);
    }
}

async fn stream_end(completion: Option<&mut Completion>) -> StreamEnd {
    match completion {
        Some(completion) => completion.await.unwrap_or(StreamEnd::Stopped),
        None => std::future::pending().await,
    }
}

async fn crossfade_result(running: &mut Option<RunningCrossfade>) -> Result<CrossfadeOutcome> {
    match running {
        Some(running) => (&mut running.result)
            .await
            .unwrap_or(Err(Error::Cancelled)),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
