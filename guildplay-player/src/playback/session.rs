//! Per-guild session: intents, child tasks and teardown
//!
//! Intents that only touch queue data take the state lock briefly and wake
//! the player loop. Intents that touch the transport (skip, pause, resume,
//! stop) are sent to the player loop, which is the only writer of
//! `current` and `state`.

use super::crossfade::CrossfadeEngine;
use super::fallback::BackgroundRotation;
use super::player::Player;
use super::radio;
use super::snapshot::SessionSnapshot;
use super::state::{CrossfadeSettings, RadioState, SessionState};
use crate::config::PlayerConfig;
use crate::download::{DownloadPipeline, MediaCache, PreloadFailure, Preloader};
use crate::error::{Error, Result};
use crate::track::Track;
use crate::transport::Transport;
use guildplay_common::{EventBus, GuildEvent, GuildId, LoopMode, PlayerState};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Messages consumed by the player loop
#[derive(Debug)]
pub(crate) enum Control {
    /// Queue or settings changed
    Wake,
    Skip {
        to: Option<usize>,
        reply: oneshot::Sender<Result<()>>,
    },
    Pause {
        reply: oneshot::Sender<Result<()>>,
    },
    Resume {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    /// Push the session volume to live streams
    ApplyVolume,
    /// The idle timer with this generation elapsed
    IdleElapsed(u64),
}

/// A cancellable child task
pub(crate) struct TaskSlot {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskSlot {
    pub(crate) fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { cancel, handle }
    }

    /// Cancel without waiting
    pub(crate) fn cancel(self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit
    pub(crate) async fn shutdown(self, guild: GuildId, name: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!(guild, task = name, "Task ended abnormally: {}", e);
            }
        }
        debug!(guild, task = name, "Task stopped");
    }
}

/// Holder for at most one running task of a kind
#[derive(Default)]
pub(crate) struct TaskCell(Mutex<Option<TaskSlot>>);

impl TaskCell {
    /// Install `slot`, returning whatever ran before
    pub(crate) fn replace(&self, slot: TaskSlot) -> Option<TaskSlot> {
        self.0.lock().ok().and_then(|mut s| s.replace(slot))
    }

    pub(crate) fn take(&self) -> Option<TaskSlot> {
        self.0.lock().ok().and_then(|mut s| s.take())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.0
            .lock()
            .map(|s| s.as_ref().is_some_and(|t| !t.handle.is_finished()))
            .unwrap_or(false)
    }

    pub(crate) async fn shutdown(&self, guild: GuildId, name: &str) {
        if let Some(slot) = self.take() {
            slot.shutdown(guild, name).await;
        }
    }
}

#[derive(Default)]
pub(crate) struct SessionTasks {
    pub radio: TaskCell,
    pub crossfade: TaskCell,
    pub idle_timer: TaskCell,
    pub player: TaskCell,
}

/// State and collaborators shared by a session's tasks
pub(crate) struct SessionShared {
    pub guild: GuildId,
    pub config: Arc<PlayerConfig>,
    state: Mutex<SessionState>,
    pub transport: Arc<dyn Transport>,
    pub pipeline: Arc<DownloadPipeline>,
    pub preloader: Preloader,
    pub events: EventBus,
    pub control: mpsc::UnboundedSender<Control>,
    pub tasks: SessionTasks,
}

impl SessionShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn cache(&self) -> &Arc<MediaCache> {
        self.pipeline.cache()
    }

    pub(crate) fn wake(&self) {
        let _ = self.control.send(Control::Wake);
    }

    pub(crate) fn emit_queue_changed(&self) {
        let queue_len = self.lock().queue.len();
        self.events.emit_lossy(GuildEvent::QueueChanged {
            guild_id: self.guild,
            queue_len,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Release the cache references of tracks leaving the session
    pub(crate) async fn release_all(&self, tracks: Vec<Track>) {
        for track in tracks {
            self.cache().release(track.id()).await;
        }
    }

    /// Schedule downloads for the head of the queue
    pub(crate) fn preload_upcoming(&self) {
        let (upcoming, limit) = {
            let state = self.lock();
            let limit = if state.radio.enabled {
                self.config.downloads.radio_preload_limit
            } else {
                self.config.downloads.preload_limit
            };
            (state.queue.upcoming(limit), limit)
        };
        if !upcoming.is_empty() {
            self.preloader.preload(&upcoming, limit);
        }
    }
}

/// Result of an enqueue intent
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub added: usize,
    /// Tracks that did not fit in the queue
    pub rejected: usize,
    pub snapshot: SessionSnapshot,
}

/// Collaborators a session is built from
pub(crate) struct SessionDeps {
    pub config: Arc<PlayerConfig>,
    pub pipeline: Arc<DownloadPipeline>,
    pub permits: Arc<Semaphore>,
    pub events: EventBus,
    pub background: BackgroundRotation,
    pub max_queue: usize,
}

/// One guild's playback session
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Build the session and start its player loop
    pub(crate) fn start(guild: GuildId, transport: Arc<dyn Transport>, deps: SessionDeps) -> Self {
        let SessionDeps {
            config,
            pipeline,
            permits,
            events,
            background,
            max_queue,
        } = deps;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel::<PreloadFailure>();

        let crossfade = CrossfadeSettings {
            enabled: config.crossfade.enabled,
            duration: Duration::from_millis(config.crossfade.duration_ms),
            steps: config.crossfade.steps,
            curve: config.crossfade.curve,
        };
        let state = SessionState::new(
            max_queue,
            config.playback.history_size,
            config.playback.default_volume,
            crossfade,
        );

        let shared = Arc::new(SessionShared {
            guild,
            preloader: Preloader::new(guild, Arc::clone(&pipeline), permits, failures_tx),
            config,
            state: Mutex::new(state),
            transport,
            pipeline,
            events,
            control: control_tx,
            tasks: SessionTasks::default(),
        });

        let engine = CrossfadeEngine::new(
            Arc::clone(&shared.transport),
            Arc::clone(&shared.pipeline),
        );
        let cancel = CancellationToken::new();
        let player = Player::new(
            Arc::clone(&shared),
            control_rx,
            failures_rx,
            engine,
            background,
            cancel.clone(),
        );
        let handle = tokio::spawn(player.run());
        shared.tasks.player.replace(TaskSlot::new(cancel, handle));

        info!(guild, max_queue, "Session started");
        Self { shared }
    }

    pub fn guild(&self) -> GuildId {
        self.shared.guild
    }

    pub fn state(&self) -> PlayerState {
        self.shared.lock().state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.lock();
        SessionSnapshot::capture(self.shared.guild, &state, self.shared.transport.as_ref())
    }

    /// Current track id, if any
    pub fn current_id(&self) -> Option<String> {
        self.shared.lock().current().map(|t| t.id().to_string())
    }

    /// Queue ids in order
    pub fn queue_ids(&self) -> Vec<String> {
        self.shared.lock().queue.ids()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// True when `current` and `state` agree
    pub fn invariant_holds(&self) -> bool {
        self.shared.lock().invariant_holds()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Resolve a query and enqueue the result
    pub async fn enqueue_query(&self, query: &str) -> Result<EnqueueOutcome> {
        let tracks = self.shared.pipeline.resolve(query).await?;
        self.enqueue(tracks).await
    }

    /// Append tracks to the queue
    ///
    /// Tracks beyond the queue capacity are rejected; the intent fails only
    /// when none fit. A user enqueue turns radio mode off.
    pub async fn enqueue(&self, tracks: Vec<Track>) -> Result<EnqueueOutcome> {
        let requested = tracks.len();
        let (added, rejected, radio_was_on) = {
            let mut state = self.shared.lock();
            let radio_was_on = std::mem::take(&mut state.radio.enabled);
            match state.queue.extend(tracks.clone()) {
                Ok(overflow) => {
                    let rejected = overflow.len();
                    let added = tracks[..requested - rejected].to_vec();
                    // Referenced before the player can pop and release them
                    for track in &added {
                        self.shared.cache().acquire(track.id());
                    }
                    (added, rejected, radio_was_on)
                }
                Err(e) => {
                    state.radio.enabled = radio_was_on;
                    return Err(e);
                }
            }
        };

        if radio_was_on {
            info!(guild = self.shared.guild, "Radio disabled by user enqueue");
            self.shared
                .tasks
                .radio
                .shutdown(self.shared.guild, "radio")
                .await;
        }
        debug!(
            guild = self.shared.guild,
            added = added.len(),
            rejected,
            "Enqueued tracks"
        );

        self.shared.emit_queue_changed();
        self.shared.wake();
        Ok(EnqueueOutcome {
            added: added.len(),
            rejected,
            snapshot: self.snapshot(),
        })
    }

    /// Skip the current track, optionally jumping to a 1-based queue position
    pub async fn skip(&self, to: Option<usize>) -> Result<SessionSnapshot> {
        self.request(|reply| Control::Skip { to, reply }).await?;
        Ok(self.snapshot())
    }

    pub async fn pause(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Control::Pause { reply }).await?;
        Ok(self.snapshot())
    }

    pub async fn resume(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Control::Resume { reply }).await?;
        Ok(self.snapshot())
    }

    /// Clear the queue and stop playback
    pub async fn stop(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Control::Stop { reply }).await?;
        Ok(self.snapshot())
    }

    pub fn set_volume(&self, volume: f32) -> Result<SessionSnapshot> {
        if !(0.0..=1.0).contains(&volume) || volume.is_nan() {
            return Err(Error::InvalidVolume(volume));
        }
        self.shared.lock().volume = volume;
        self.send(Control::ApplyVolume)?;
        Ok(self.snapshot())
    }

    pub fn shuffle(&self) -> Result<SessionSnapshot> {
        self.shared.lock().queue.shuffle(&mut rand::thread_rng());
        self.shared.emit_queue_changed();
        self.send(Control::Wake)?;
        Ok(self.snapshot())
    }

    pub async fn clear(&self) -> Result<SessionSnapshot> {
        let removed = self.shared.lock().queue.clear();
        self.shared.release_all(removed).await;
        self.shared.emit_queue_changed();
        self.send(Control::Wake)?;
        Ok(self.snapshot())
    }

    /// Remove the track at a 1-based queue position
    pub async fn remove(&self, position: usize) -> Result<SessionSnapshot> {
        let removed = self.shared.lock().queue.remove(position)?;
        info!(guild = self.shared.guild, track = %removed.id(), position, "Removed from queue");
        self.shared.release_all(vec![removed]).await;
        self.shared.emit_queue_changed();
        self.send(Control::Wake)?;
        Ok(self.snapshot())
    }

    pub fn set_loop_mode(&self, mode: LoopMode) -> Result<SessionSnapshot> {
        self.shared.lock().loop_mode = mode;
        info!(guild = self.shared.guild, %mode, "Loop mode set");
        self.send(Control::Wake)?;
        Ok(self.snapshot())
    }

    /// Start the radio filler seeded by `seed_id`
    pub async fn enable_radio(&self, seed_id: impl Into<String>) -> Result<SessionSnapshot> {
        let seed_id = seed_id.into();
        {
            let mut state = self.shared.lock();
            let mut seen: HashSet<String> = state.queue.ids().into_iter().collect();
            seen.insert(seed_id.clone());
            if let Some(current) = state.current() {
                seen.insert(current.id().to_string());
            }
            state.radio = RadioState {
                enabled: true,
                seed_id: Some(seed_id.clone()),
                seen,
            };
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(radio::run(Arc::clone(&self.shared), cancel.clone()));
        if let Some(previous) = self
            .shared
            .tasks
            .radio
            .replace(TaskSlot::new(cancel, handle))
        {
            previous.shutdown(self.shared.guild, "radio").await;
        }
        info!(guild = self.shared.guild, seed = %seed_id, "Radio enabled");
        Ok(self.snapshot())
    }

    pub async fn disable_radio(&self) -> Result<SessionSnapshot> {
        self.shared.lock().radio.enabled = false;
        self.shared
            .tasks
            .radio
            .shutdown(self.shared.guild, "radio")
            .await;
        info!(guild = self.shared.guild, "Radio disabled");
        Ok(self.snapshot())
    }

    pub fn radio_running(&self) -> bool {
        self.shared.tasks.radio.is_running()
    }

    /// Enable or disable crossfading; `duration` replaces the current one
    pub fn set_crossfade(&self, enabled: bool, duration: Option<Duration>) -> Result<SessionSnapshot> {
        {
            let mut state = self.shared.lock();
            state.crossfade.enabled = enabled;
            if let Some(duration) = duration {
                state.crossfade.duration = duration;
            }
        }
        self.send(Control::Wake)?;
        Ok(self.snapshot())
    }

    pub fn toggle_crossfade(&self) -> Result<SessionSnapshot> {
        let enabled = !self.shared.lock().crossfade.enabled;
        self.set_crossfade(enabled, None)
    }

    /// Speech output is refused while a track is playing
    pub fn ensure_can_speak(&self) -> Result<()> {
        if self.state() == PlayerState::Playing {
            return Err(Error::Busy("a track is playing".to_string()));
        }
        Ok(())
    }

    fn send(&self, control: Control) -> Result<()> {
        self.shared
            .control
            .send(control)
            .map_err(|_| Error::NotConnected(self.shared.guild))
    }

    async fn request<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Control,
    {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response
            .await
            .map_err(|_| Error::NotConnected(self.shared.guild))?
    }

    /// Cancel every child task in order, then release the transport and
    /// the session's media files
    pub(crate) async fn shutdown(&self) {
        let guild = self.shared.guild;
        info!(guild, "Session shutting down");

        self.shared.preloader.shutdown().await;
        self.shared.tasks.radio.shutdown(guild, "radio").await;
        self.shared.tasks.crossfade.shutdown(guild, "crossfade").await;
        self.shared.tasks.idle_timer.shutdown(guild, "idle timer").await;
        self.shared.tasks.player.shutdown(guild, "player").await;

        if let Err(e) = self.shared.transport.disconnect().await {
            warn!(guild, "Transport disconnect failed: {}", e);
        }

        let leftover = {
            let mut state = self.shared.lock();
            state.radio.enabled = false;
            let mut tracks = state.queue.clear();
            let (_, current) = state.go_idle();
            tracks.extend(current);
            tracks
        };
        self.shared.release_all(leftover).await;
        info!(guild, "Session shut down");
    }
}
