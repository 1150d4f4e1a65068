//! Exponential backoff applied when the detector reports a block.
//!
//! Wait schedule with the defaults (30 min base, 8 h ceiling):
//!
//! ```text
//! failures  0-4  -> 30 min
//! failures  5-9  -> 60 min
//! failures 10-14 -> 120 min
//! failures 15-19 -> 240 min
//! failures 20+   -> 480 min (capped)
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::detector::SchedulerState;

/// How a backoff wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_wait_minutes: u64,
    pub max_wait_hours: u64,
    /// Size of each uninterruptible sleep slice.
    pub chunk: Duration,
    /// Log progress every this many chunks.
    pub progress_every: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_wait_minutes: 30,
            max_wait_hours: 8,
            chunk: Duration::from_secs(60),
            progress_every: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_wait_minutes: u64, max_wait_hours: u64) -> Self {
        Self {
            base_wait_minutes,
            max_wait_hours,
            ..Default::default()
        }
    }

    pub fn with_chunk(mut self, chunk: Duration) -> Self {
        self.chunk = chunk;
        self
    }

    /// `min(base * 2^(failures / 5), max_hours * 60)`.
    pub fn wait_minutes(&self, state: &SchedulerState) -> u64 {
        let exponent = state.consecutive_failures / 5;
        let uncapped = self
            .base_wait_minutes
            .saturating_mul(2u64.saturating_pow(exponent));
        uncapped.min(self.max_wait_hours.saturating_mul(60))
    }

    pub fn wait_seconds(&self, state: &SchedulerState) -> u64 {
        self.wait_minutes(state).saturating_mul(60)
    }

    pub fn wait_duration(&self, state: &SchedulerState) -> Duration {
        Duration::from_secs(self.wait_seconds(state))
    }

    /// Sleeps for `total` in chunks, returning early if `cancel` fires.
    ///
    /// Does not touch the scheduler state; call [`Self::complete`] once the
    /// wait has run to the end.
    pub async fn wait(&self, total: Duration, cancel: &CancellationToken) -> WaitOutcome {
        tracing::warn!(
            wait_minutes = total.as_secs() / 60,
            "Waiting {:.1} hours for potential unblocking",
            total.as_secs_f64() / 3600.0
        );

        let chunk = if self.chunk.is_zero() {
            total
        } else {
            self.chunk
        };
        let mut remaining = total;
        let mut chunks_done = 0u32;

        while !remaining.is_zero() {
            let slice = remaining.min(chunk);
            tokio::select! {
                () = tokio::time::sleep(slice) => {}
                () = cancel.cancelled() => {
                    tracing::info!(
                        remaining_secs = remaining.as_secs(),
                        "Backoff wait cancelled"
                    );
                    return WaitOutcome::Cancelled;
                }
            }
            remaining -= slice;
            chunks_done += 1;

            if self.progress_every > 0 && chunks_done % self.progress_every == 0 {
                let elapsed = total - remaining;
                tracing::info!(
                    elapsed_minutes = elapsed.as_secs() / 60,
                    remaining_minutes = remaining.as_secs() / 60,
                    "Backoff wait progress"
                );
            }
        }

        WaitOutcome::Completed
    }

    /// Applies the post-wait partial reset (failures minus two, floored at zero).
    pub fn complete(&self, state: &mut SchedulerState) {
        state.decay_after_backoff();
        tracing::info!(
            failures = state.consecutive_failures,
            "Backoff wait complete, reduced failure counter"
        );
    }
}
