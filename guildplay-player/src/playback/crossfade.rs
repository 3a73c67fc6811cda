//! Crossfade engine
//!
//! Drives two simultaneous gain ramps: the outgoing stream falls 1 -> 0
//! while the incoming stream rises 0 -> 1, both scaled by session volume.
//! The engine starts the incoming stream itself and hands it back to the
//! player loop once the outgoing stream has been stopped.

use super::fade::{wait_step, Ramp, StepWait};
use crate::download::DownloadPipeline;
use crate::error::{Error, Result};
use crate::track::Track;
use crate::transport::{Completion, MediaSource, StreamId, Transport};
use guildplay_common::{FadeCurve, GuildId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CrossfadeRequest {
    pub guild: GuildId,
    pub outgoing: StreamId,
    pub incoming: Track,
    pub duration: Duration,
    pub steps: u32,
    pub curve: FadeCurve,
    pub volume: f32,
    /// Bound on waiting for the incoming track's media and stream start
    pub startup_timeout: Duration,
}

/// The incoming stream, now the sole output at full session volume
#[derive(Debug)]
pub struct CrossfadeOutcome {
    pub incoming: Track,
    pub stream: StreamId,
    pub completion: Completion,
}

#[derive(Clone)]
pub struct CrossfadeEngine {
    transport: Arc<dyn Transport>,
    pipeline: Arc<DownloadPipeline>,
}

impl CrossfadeEngine {
    pub fn new(transport: Arc<dyn Transport>, pipeline: Arc<DownloadPipeline>) -> Self {
        Self {
            transport,
            pipeline,
        }
    }

    /// Run one crossfade
    ///
    /// Preparation failures return `Error::Crossfade` with the outgoing
    /// stream untouched, so the caller can fall back to a hard cut.
    /// `cancel` aborts without further gain updates; `finish` jumps to the
    /// end of the ramp.
    pub async fn run(
        &self,
        request: CrossfadeRequest,
        cancel: &CancellationToken,
        finish: &CancellationToken,
    ) -> Result<CrossfadeOutcome> {
        let CrossfadeRequest {
            guild,
            outgoing,
            incoming,
            duration,
            steps,
            curve,
            volume,
            startup_timeout,
        } = request;

        let path = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            ready = tokio::time::timeout(startup_timeout, self.pipeline.download(&incoming)) => match ready {
                Ok(Ok(path)) => path,
                Ok(Err(e)) => {
                    return Err(Error::Crossfade(format!("{} not available: {}", incoming.id(), e)));
                }
                Err(_) => {
                    return Err(Error::Crossfade(format!(
                        "{} not ready within {:?}",
                        incoming.id(),
                        startup_timeout
                    )));
                }
            },
        };

        let source = MediaSource {
            path,
            duration: incoming.duration(),
            label: incoming.title().to_string(),
        };
        let started = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            started = tokio::time::timeout(startup_timeout, self.transport.play(source, 0.0)) => started,
        };
        let (stream, completion) = match started {
            Ok(Ok(started)) => started,
            Ok(Err(e)) => return Err(Error::Crossfade(format!("incoming stream failed: {e}"))),
            Err(_) => return Err(Error::Crossfade("incoming stream did not start".to_string())),
        };

        info!(
            guild,
            %outgoing,
            incoming = %stream,
            track = %incoming.id(),
            duration_ms = duration.as_millis() as u64,
            %curve,
            "Crossfade started"
        );

        let ramp = Ramp::new(duration, steps);
        let interval = ramp.step_interval();
        for position in ramp.positions() {
            match wait_step(interval, cancel, Some(finish)).await {
                StepWait::Elapsed => {}
                StepWait::FinishNow => {
                    debug!(guild, "Crossfade finished early");
                    break;
                }
                StepWait::Cancelled => {
                    debug!(guild, "Crossfade cancelled");
                    let _ = self.transport.stop(stream).await;
                    return Err(Error::Cancelled);
                }
            }

            let out_gain = volume * curve.calculate_fade_out(position);
            let in_gain = volume * curve.calculate_fade_in(position);
            if let Err(e) = self.transport.set_gain(outgoing, out_gain).await {
                // The outgoing track may end on its own just before the ramp does
                debug!(guild, %outgoing, "Outgoing gain update skipped: {}", e);
            }
            if let Err(e) = self.transport.set_gain(stream, in_gain).await {
                warn!(guild, incoming = %stream, "Incoming stream lost mid-crossfade: {}", e);
                let _ = self.transport.stop(stream).await;
                let _ = self.transport.set_gain(outgoing, volume).await;
                return Err(Error::Crossfade(format!("incoming stream lost: {e}")));
            }
        }

        if let Err(e) = self.transport.stop(outgoing).await {
            debug!(guild, %outgoing, "Outgoing stream already gone: {}", e);
        }
        if let Err(e) = self.transport.set_gain(stream, volume).await {
            warn!(guild, incoming = %stream, "Final gain update failed: {}", e);
        }
        info!(guild, track = %incoming.id(), "Crossfade completed");

        Ok(CrossfadeOutcome {
            incoming,
            stream,
            completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::MediaCache;
    use crate::resolver::{Fetcher, Resolver};
    use crate::track::{Provenance, TrackMeta};
    use crate::transport::{SimulatedTransport, TransportCall};
    use async_trait::async_trait;
    use std::path::Path;

    struct NoSource;

    #[async_trait]
    impl Resolver for NoSource {
        async fn resolve(&self, _query: &str) -> Result<Vec<TrackMeta>> {
            Ok(vec![])
        }
        async fn resolve_playlist(&self, _query: &str) -> Result<Vec<TrackMeta>> {
            Ok(vec![])
        }
        async fn related(&self, _seed_id: &str, _limit: usize) -> Result<Vec<TrackMeta>> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl Fetcher for NoSource {
        async fn fetch(&self, _track: &TrackMeta, _dest_dir: &Path) -> Result<()> {
            Err(Error::Download("offline".to_string()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        transport: SimulatedTransport,
        engine: CrossfadeEngine,
        outgoing: StreamId,
        incoming: Track,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let transport = SimulatedTransport::new();
        transport.connect().await.unwrap();
        let pipeline = Arc::new(DownloadPipeline::new(
            Arc::new(NoSource),
            Arc::new(NoSource),
            Arc::new(MediaCache::new(dir.path(), false)),
            Duration::from_secs(1),
        ));
        let engine = CrossfadeEngine::new(Arc::new(transport.clone()), pipeline);

        let (outgoing, _) = transport
            .play(
                MediaSource {
                    path: dir.path().join("out.webm"),
                    duration: Duration::ZERO,
                    label: "Out".to_string(),
                },
                0.8,
            )
            .await
            .unwrap();

        let path = dir.path().join("in.webm");
        std::fs::write(&path, b"audio").unwrap();
        let incoming = Track::new(TrackMeta::minimal("in", "In", "u"), Provenance::Direct);
        incoming.mark_ready(path);

        Fixture {
            _dir: dir,
            transport,
            engine,
            outgoing,
            incoming,
        }
    }

    fn request(f: &Fixture, duration_ms: u64) -> CrossfadeRequest {
        CrossfadeRequest {
            guild: 1,
            outgoing: f.outgoing,
            incoming: f.incoming.clone(),
            duration: Duration::from_millis(duration_ms),
            steps: 4,
            curve: FadeCurve::Linear,
            volume: 0.8,
            startup_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_crossfade_swaps_streams() {
        let f = fixture().await;
        let outcome = f
            .engine
            .run(
                request(&f, 80),
                &CancellationToken::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(f.transport.active_streams(), vec![outcome.stream]);
        assert_eq!(f.transport.gain_of(outcome.stream), Some(0.8));
        assert_eq!(outcome.incoming.id(), "in");

        let calls = f.transport.calls();
        let out_gains: Vec<f32> = calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Gain { stream, gain } if *stream == f.outgoing => Some(*gain),
                _ => None,
            })
            .collect();
        assert_eq!(out_gains.len(), 4);
        assert!(out_gains.windows(2).all(|w| w[1] <= w[0]));
        assert!(out_gains[3].abs() < 1e-6);
        assert!(calls.contains(&TransportCall::Stop { stream: f.outgoing }));
    }

    #[tokio::test]
    async fn test_unavailable_incoming_leaves_outgoing_untouched() {
        let f = fixture().await;
        f.incoming.mark_failed();
        let err = f
            .engine
            .run(
                request(&f, 80),
                &CancellationToken::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Crossfade(_)));
        assert_eq!(f.transport.active_streams(), vec![f.outgoing]);
        assert_eq!(f.transport.gain_of(f.outgoing), Some(0.8));
    }

    #[tokio::test]
    async fn test_cancel_stops_incoming_only() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        let err = f
            .engine
            .run(request(&f, 2_000), &cancel, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(f.transport.active_streams(), vec![f.outgoing]);
    }

    #[tokio::test]
    async fn test_finish_jumps_to_end() {
        let f = fixture().await;
        let finish = CancellationToken::new();
        finish.cancel();
        let started = std::time::Instant::now();
        let outcome = f
            .engine
            .run(request(&f, 10_000), &CancellationToken::new(), &finish)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(f.transport.gain_of(outcome.stream), Some(0.8));
        drop(outcome.completion);
        assert!(f.transport.calls().contains(&TransportCall::Stop { stream: f.outgoing }));
    }
}
