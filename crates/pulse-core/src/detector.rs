//! Blocking detection for the harvesting loop.
//!
//! The target site rarely says "you are blocked". Instead it starts timing
//! out, returning 403/429, or serving CAPTCHA walls. The detector keeps two
//! views of that:
//!
//! ```text
//! failure reason --classify--> Blocking | Transient      (per outcome)
//! SchedulerState --verdict---> Clear | TooManyFailures | Stalled   (per item)
//! ```
//!
//! Both views are pure functions: the mutable [`SchedulerState`] is owned by
//! the harvester and passed in by reference.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

/// Substrings (lower-case) that mark a failure reason as blocking-class.
pub const BLOCKING_INDICATORS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "403",
    "429",
    "captcha",
    "suspended",
    "blocked",
    "unauthorized",
    "protected",
    "timeout",
];

/// Classification of a failed extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The target actively refused automated access.
    Blocking,
    /// Anything else (parse misses, empty pages, ...).
    Transient,
}

impl FailureClass {
    /// Classifies an extractor error. Typed rate-limit and timeout errors are
    /// blocking regardless of their wording. Status errors are judged on the
    /// status alone, never on the URL.
    pub fn of(error: &AppError) -> Self {
        match error {
            AppError::RateLimitExceeded | AppError::Timeout(_) => FailureClass::Blocking,
            AppError::HttpStatus { status, .. } => classify(&format!("HTTP {status}")),
            other => classify(&other.to_string()),
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Blocking => write!(f, "blocking"),
            FailureClass::Transient => write!(f, "transient"),
        }
    }
}

/// Case-insensitive match of a failure reason against [`BLOCKING_INDICATORS`].
pub fn classify(reason: &str) -> FailureClass {
    let reason = reason.to_lowercase();
    if BLOCKING_INDICATORS
        .iter()
        .any(|indicator| reason.contains(indicator))
    {
        FailureClass::Blocking
    } else {
        FailureClass::Transient
    }
}

/// Failure history of one harvester.
///
/// `consecutive_failures` only grows on extraction failures and only shrinks
/// through a success (to zero) or a completed backoff wait (by two).
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub consecutive_failures: u32,
    pub last_success: Instant,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl SchedulerState {
    /// Fresh state. `last_success` starts at `now` so a new process is not
    /// considered stalled before it has tried anything.
    pub fn new(now: Instant) -> Self {
        Self {
            consecutive_failures: 0,
            last_success: now,
            processed: 0,
            succeeded: 0,
            failed: 0,
        }
    }

    /// Clears the per-run counters. Failure history survives.
    pub fn reset_counters(&mut self) {
        self.processed = 0;
        self.succeeded = 0;
        self.failed = 0;
    }

    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.last_success = now;
        self.succeeded += 1;
    }

    /// Extraction failed, whatever its class.
    pub fn record_extraction_failure(&mut self) {
        self.consecutive_failures += 1;
        self.failed += 1;
    }

    /// The item failed for a reason unrelated to the target (e.g. the store).
    pub fn record_store_failure(&mut self) {
        self.failed += 1;
    }

    /// Partial reset after a completed backoff wait.
    pub fn decay_after_backoff(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_sub(2);
    }
}

/// Outcome of a blocking check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerdict {
    Clear,
    /// Hard block: too many failures in a row.
    TooManyFailures { failures: u32 },
    /// Slow degradation: several failures and no success for a while.
    Stalled {
        failures: u32,
        since_success: Duration,
    },
}

impl BlockVerdict {
    pub fn is_blocked(&self) -> bool {
        !matches!(self, BlockVerdict::Clear)
    }
}

impl fmt::Display for BlockVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockVerdict::Clear => write!(f, "clear"),
            BlockVerdict::TooManyFailures { failures } => {
                write!(f, "{failures} consecutive failures")
            }
            BlockVerdict::Stalled {
                failures,
                since_success,
            } => write!(
                f,
                "{failures} failures and no success in {} minutes",
                since_success.as_secs() / 60
            ),
        }
    }
}

/// Thresholds for the blocked verdict.
#[derive(Debug, Clone, Copy)]
pub struct BlockingDetector {
    /// Rule (a): this many consecutive failures means blocked.
    pub max_consecutive_failures: u32,
    /// Rule (b): at least this many failures...
    pub stalled_failure_threshold: u32,
    /// ...and no success for longer than this.
    pub stalled_after: Duration,
}

impl Default for BlockingDetector {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            stalled_failure_threshold: 3,
            stalled_after: Duration::from_secs(30 * 60),
        }
    }
}

impl BlockingDetector {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            max_consecutive_failures,
            ..Default::default()
        }
    }

    pub fn verdict(&self, state: &SchedulerState, now: Instant) -> BlockVerdict {
        let failures = state.consecutive_failures;
        if failures >= self.max_consecutive_failures {
            return BlockVerdict::TooManyFailures { failures };
        }

        let since_success = now.saturating_duration_since(state.last_success);
        if failures >= self.stalled_failure_threshold && since_success > self.stalled_after {
            return BlockVerdict::Stalled {
                failures,
                since_success,
            };
        }

        BlockVerdict::Clear
    }

    pub fn is_blocked(&self, state: &SchedulerState, now: Instant) -> bool {
        self.verdict(state, now).is_blocked()
    }
}
