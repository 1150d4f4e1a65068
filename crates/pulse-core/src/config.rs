use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::detector::BlockingDetector;
use crate::error::AppError;
use crate::pacing::PacingConfig;

/// Longest backoff ceiling accepted (one year).
pub const MAX_WAIT_HOURS: u64 = 24 * 365;
/// Longest schedule interval accepted (one year).
pub const MAX_SCHEDULE_INTERVAL_MINUTES: u64 = 60 * 24 * 365;
/// Longest base pause between items accepted (one day).
pub const MAX_INTER_ITEM_DELAY_SECONDS: u64 = 60 * 60 * 24;

/// Converts a schedule interval to a duration, rejecting zero and values
/// above [`MAX_SCHEDULE_INTERVAL_MINUTES`].
pub fn schedule_interval_from_minutes(minutes: u64) -> Result<Duration, AppError> {
    if minutes == 0 || minutes > MAX_SCHEDULE_INTERVAL_MINUTES {
        return Err(AppError::ConfigError(format!(
            "schedule_interval_minutes must be between 1 and {MAX_SCHEDULE_INTERVAL_MINUTES}, got {minutes}"
        )));
    }
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::ConfigError(format!("schedule interval of {minutes} minutes overflows")))
}

/// Tunables for the harvesting scheduler.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Consecutive failures that count as a hard block.
    pub max_consecutive_failures: u32,
    pub blocking_base_wait_minutes: u64,
    pub blocking_max_wait_hours: u64,
    pub inter_item_delay_seconds: u64,
    pub schedule_interval_minutes: u64,
    pub cache_ttl_seconds: u64,
    /// Upper bound on a single extractor call.
    pub extract_timeout_secs: u64,
    pub backoff_chunk_secs: u64,
    /// Consecutive errored runs tolerated by continuous mode.
    pub max_run_errors: u32,
    /// Pause after an errored run in continuous mode.
    pub run_error_pause: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            blocking_base_wait_minutes: 30,
            blocking_max_wait_hours: 8,
            inter_item_delay_seconds: 5,
            schedule_interval_minutes: 1440,
            cache_ttl_seconds: 300,
            extract_timeout_secs: 30,
            backoff_chunk_secs: 60,
            max_run_errors: 5,
            run_error_pause: Duration::from_secs(300),
        }
    }
}

impl HarvestConfig {
    /// Rejects values that would make the scheduler spin or never recover.
    pub fn validate(&self) -> Result<(), AppError> {
        let positive = [
            ("max_consecutive_failures", self.max_consecutive_failures as u64),
            ("blocking_base_wait_minutes", self.blocking_base_wait_minutes),
            ("blocking_max_wait_hours", self.blocking_max_wait_hours),
            ("schedule_interval_minutes", self.schedule_interval_minutes),
            ("cache_ttl_seconds", self.cache_ttl_seconds),
            ("extract_timeout_secs", self.extract_timeout_secs),
            ("backoff_chunk_secs", self.backoff_chunk_secs),
            ("max_run_errors", self.max_run_errors as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AppError::ConfigError(format!("{name} must be at least 1")));
            }
        }

        let bounded = [
            ("blocking_max_wait_hours", self.blocking_max_wait_hours, MAX_WAIT_HOURS),
            (
                "inter_item_delay_seconds",
                self.inter_item_delay_seconds,
                MAX_INTER_ITEM_DELAY_SECONDS,
            ),
        ];
        for (name, value, max) in bounded {
            if value > max {
                return Err(AppError::ConfigError(format!(
                    "{name} must be at most {max}, got {value}"
                )));
            }
        }
        schedule_interval_from_minutes(self.schedule_interval_minutes)?;

        let ceiling_minutes = self.blocking_max_wait_hours.checked_mul(60).ok_or_else(|| {
            AppError::ConfigError(format!(
                "blocking_max_wait_hours ({}) overflows",
                self.blocking_max_wait_hours
            ))
        })?;
        if self.blocking_base_wait_minutes > ceiling_minutes {
            return Err(AppError::ConfigError(format!(
                "blocking_base_wait_minutes ({}) exceeds blocking_max_wait_hours ({}h)",
                self.blocking_base_wait_minutes, self.blocking_max_wait_hours
            )));
        }

        Ok(())
    }

    pub fn detector(&self) -> BlockingDetector {
        BlockingDetector::new(self.max_consecutive_failures)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.blocking_base_wait_minutes, self.blocking_max_wait_hours)
            .with_chunk(Duration::from_secs(self.backoff_chunk_secs))
    }

    pub fn pacing(&self) -> PacingConfig {
        PacingConfig::new(Duration::from_secs(self.inter_item_delay_seconds))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_minutes.saturating_mul(60))
    }
}
