//! Jittered delay between consecutive extractions.
//!
//! A fixed delay produces a perfectly regular request pattern, which is a
//! detection signal in itself. Each pause is `base × uniform(0.8, 1.2)`.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Configuration for the inter-item pause.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub base_delay: Duration,
    /// Lower bound of the jitter factor.
    pub min_factor: f64,
    /// Upper bound of the jitter factor.
    pub max_factor: f64,
}

impl PacingConfig {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            min_factor: 0.8,
            max_factor: 1.2,
        }
    }

    /// Draws one delay from `[base * min_factor, base * max_factor]`.
    pub fn next_delay(&self) -> Duration {
        if self.base_delay.is_zero() || self.min_factor >= self.max_factor {
            return self.base_delay.mul_f64(self.min_factor.max(0.0));
        }
        let factor = rand::rng().random_range(self.min_factor..=self.max_factor);
        self.base_delay.mul_f64(factor)
    }

    /// Sleeps for one jittered delay. Returns false if cancelled first.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        tracing::debug!(
            delay_ms = %delay.as_millis(),
            "Waiting before next request"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = cancel.cancelled() => false,
        }
    }
}

impl Default for PacingConfig {
    /// 5 seconds base delay with ±20% jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
