//! Step-driven gain ramps
//!
//! A ramp is a fixed number of sleeps; cancellation is observed at every
//! step boundary, so a cancelled ramp issues no further gain updates.

use crate::error::{Error, Result};
use crate::transport::{StreamId, Transport};
use guildplay_common::FadeCurve;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ramp {
    pub duration: Duration,
    pub steps: u32,
}

impl Ramp {
    pub fn new(duration: Duration, steps: u32) -> Self {
        Self {
            duration,
            steps: steps.max(1),
        }
    }

    pub fn step_interval(&self) -> Duration {
        self.duration / self.steps.max(1)
    }

    /// Normalized position after each step, ending at exactly 1.0
    pub fn positions(&self) -> impl Iterator<Item = f32> {
        let steps = self.steps.max(1);
        (1..=steps).map(move |i| i as f32 / steps as f32)
    }
}

/// Result of waiting for the next ramp step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepWait {
    Elapsed,
    /// Caller asked to jump to the end of the ramp
    FinishNow,
    Cancelled,
}

pub async fn wait_step(
    interval: Duration,
    cancel: &CancellationToken,
    finish: Option<&CancellationToken>,
) -> StepWait {
    let finish_now = async {
        match finish {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => StepWait::Cancelled,
        _ = finish_now => StepWait::FinishNow,
        _ = tokio::time::sleep(interval) => StepWait::Elapsed,
    }
}

/// Gain at `position` on the way from `from` to `to`
pub fn gain_at(from: f32, to: f32, position: f32, curve: FadeCurve) -> f32 {
    if to >= from {
        from + (to - from) * curve.calculate_fade_in(position)
    } else {
        to + (from - to) * curve.calculate_fade_out(position)
    }
}

/// Ramp one stream's gain from `from` to `to`
///
/// Returns `Error::Cancelled` if `cancel` fires before the ramp ends.
pub async fn fade_stream(
    transport: &dyn Transport,
    stream: StreamId,
    from: f32,
    to: f32,
    ramp: Ramp,
    curve: FadeCurve,
    cancel: &CancellationToken,
) -> Result<()> {
    let interval = ramp.step_interval();
    for position in ramp.positions() {
        match wait_step(interval, cancel, None).await {
            StepWait::Cancelled => return Err(Error::Cancelled),
            StepWait::Elapsed | StepWait::FinishNow => {}
        }
        transport
            .set_gain(stream, gain_at(from, to, position, curve))
            .await?;
    }
    Ok(())
}
