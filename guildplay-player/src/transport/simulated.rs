//! Timer-driven transport used by the demo binary and the test suite
//!
//! Streams "play" for their duration hint in real time (forever when the
//! hint is zero), honour pause/resume, and every call is recorded so tests
//! can assert on ordering.

use super::{Completion, MediaSource, StreamEnd, StreamId, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One recorded transport interaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect,
    Disconnect,
    Play { stream: StreamId, label: String, gain: f32 },
    Stop { stream: StreamId },
    Gain { stream: StreamId, gain: f32 },
    Pause,
    Resume,
    /// Stream reached the end of its media
    Ended { stream: StreamId },
}

struct SimStream {
    gain: f32,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SimState {
    connected: bool,
    next_id: u64,
    streams: HashMap<StreamId, SimStream>,
    calls: Vec<TransportCall>,
    fail_plays: usize,
    startup_delay: Duration,
}

struct Inner {
    state: Mutex<SimState>,
    paused: watch::Sender<bool>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked elsewhere
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process [`Transport`] with no audio device
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Inner>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SimState::default()),
                paused,
            }),
        }
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.state().calls.clone()
    }

    /// Labels of streams passed to `play`, in order
    pub fn played_labels(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::Play { label, .. } => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn active_streams(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.inner.state().streams.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn gain_of(&self, stream: StreamId) -> Option<f32> {
        self.inner.state().streams.get(&stream).map(|s| s.gain)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().connected
    }

    /// Make the next `count` calls to `play` fail
    pub fn fail_next_plays(&self, count: usize) {
        self.inner.state().fail_plays = count;
    }

    /// Delay every `play` call before the stream starts
    pub fn set_startup_delay(&self, delay: Duration) {
        self.inner.state().startup_delay = delay;
    }

    fn record(&self, call: TransportCall) {
        self.inner.state().calls.push(call);
    }

    async fn halt(&self, stream: StreamId) -> bool {
        let entry = self.inner.state().streams.remove(&stream);
        let Some(mut entry) = entry else {
            return false;
        };
        entry.cancel.cancel();
        if let Some(handle) = entry.handle.take() {
            let _ = handle.await;
        }
        true
    }
}

async fn run_stream(
    inner: Arc<Inner>,
    stream: StreamId,
    duration: Duration,
    cancel: CancellationToken,
    done: oneshot::Sender<StreamEnd>,
) {
    let mut paused = inner.paused.subscribe();
    let mut remaining = (!duration.is_zero()).then_some(duration);

    let end = loop {
        if *paused.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => break StreamEnd::Stopped,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break StreamEnd::Stopped;
                    }
                    continue;
                }
            }
        }

        let started = Instant::now();
        let playout = async {
            match remaining {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break StreamEnd::Stopped,
            changed = paused.changed() => {
                if changed.is_err() {
                    break StreamEnd::Stopped;
                }
                if let Some(rem) = remaining.as_mut() {
                    *rem = rem.saturating_sub(started.elapsed());
                }
            }
            _ = playout => break StreamEnd::Finished,
        }
    };

    if end == StreamEnd::Finished {
        let mut state = inner.state();
        state.streams.remove(&stream);
        state.calls.push(TransportCall::Ended { stream });
    }
    debug!(%stream, ?end, "Simulated stream ended");
    let _ = done.send(end);
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self) -> Result<()> {
        let mut state = self.inner.state();
        state.connected = true;
        state.calls.push(TransportCall::Connect);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let ids = self.active_streams();
        for id in ids {
            self.halt(id).await;
        }
        self.inner.paused.send_replace(false);
        let mut state = self.inner.state();
        state.connected = false;
        state.calls.push(TransportCall::Disconnect);
        Ok(())
    }

    async fn play(&self, source: MediaSource, gain: f32) -> Result<(StreamId, Completion)> {
        let delay = {
            let mut state = self.inner.state();
            if !state.connected {
                return Err(Error::Transport("not connected".to_string()));
            }
            if state.fail_plays > 0 {
                state.fail_plays -= 1;
                return Err(Error::Transport(format!("refused to play {}", source.label)));
            }
            state.startup_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let gain = gain.clamp(0.0, 1.0);

        let mut state = self.inner.state();
        state.next_id += 1;
        let stream = StreamId(state.next_id);
        let handle = tokio::spawn(run_stream(
            Arc::clone(&self.inner),
            stream,
            source.duration,
            cancel.clone(),
            done_tx,
        ));
        state.streams.insert(
            stream,
            SimStream {
                gain,
                cancel,
                handle: Some(handle),
            },
        );
        state.calls.push(TransportCall::Play {
            stream,
            label: source.label,
            gain,
        });
        Ok((stream, done_rx))
    }

    async fn stop(&self, stream: StreamId) -> Result<()> {
        self.record(TransportCall::Stop { stream });
        self.halt(stream).await;
        Ok(())
    }

    async fn set_gain(&self, stream: StreamId, gain: f32) -> Result<()> {
        let mut state = self.inner.state();
        let gain = gain.clamp(0.0, 1.0);
        match state.streams.get_mut(&stream) {
            Some(entry) => {
                entry.gain = gain;
                state.calls.push(TransportCall::Gain { stream, gain });
                Ok(())
            }
            None => Err(Error::Transport(format!("{stream} is not active"))),
        }
    }

    async fn pause(&self) -> Result<()> {
        self.inner.paused.send_replace(true);
        self.record(TransportCall::Pause);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.inner.paused.send_replace(false);
        self.record(TransportCall::Resume);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        let state = self.inner.state();
        state.connected && !state.streams.is_empty() && !*self.inner.paused.borrow()
    }

    fn is_paused(&self) -> bool {
        let state = self.inner.state();
        !state.streams.is_empty() && *self.inner.paused.borrow()
    }
}
