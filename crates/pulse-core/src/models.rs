use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A calendar-month bucket (`YYYY-MM`) used to scope work sets and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::Generic(format!(
                "Invalid month {month}: must be between 1 and 12"
            )));
        }
        Ok(Self { year, month })
    }

    /// The period containing the given instant (UTC calendar).
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// The current UTC calendar month.
    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    /// The period a calendar day falls in.
    pub fn of_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::Generic(format!("Invalid period '{s}': expected YYYY-MM"));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Period::new(year, month)
    }
}

/// One trackable post, as registered by the submission path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable unique identifier (the status id parsed from the URL).
    pub external_id: String,
    pub url: String,
    /// Attribution label for leaderboards.
    pub owner: String,
    pub period: Period,
}

/// Raw counts returned by an extractor.
///
/// Every field is optional on the wire; a missing count reads as `0` and a
/// missing date or handle as unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub impressions: u64,
    /// Primary reaction count.
    pub likes: u64,
    /// Secondary reaction count.
    pub reposts: u64,
    pub replies: u64,
    pub posted_at: Option<DateTime<Utc>>,
    pub author_handle: Option<String>,
}

/// A measurement snapshot for one work item, superseded in place on each harvest.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsRecord {
    pub item: WorkItem,
    pub metrics: Metrics,
    pub observed_at: DateTime<Utc>,
    /// Set by the store on every write.
    pub last_updated: DateTime<Utc>,
}

impl MetricsRecord {
    pub fn new(item: WorkItem, metrics: Metrics, observed_at: DateTime<Utc>) -> Self {
        Self {
            item,
            metrics,
            observed_at,
            last_updated: observed_at,
        }
    }

    pub fn external_id(&self) -> &str {
        &self.item.external_id
    }
}

/// Counters returned by a single harvesting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Blocked verdict at the end of the run.
    pub blocked: bool,
    /// The run stopped early because shutdown was requested.
    pub cancelled: bool,
    /// Another run was already in flight, so this one did nothing.
    pub skipped: bool,
}

impl RunStats {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Percentage of processed items that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / self.total as f64
        }
    }

    /// More failures than successes: the scheduler should slow down.
    pub fn is_degraded(&self) -> bool {
        self.failed > self.succeeded
    }
}

/// Per-day totals, recorded once a day for the daily series charts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub impressions: u64,
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub posts: u64,
}

impl DailySnapshot {
    pub fn period(&self) -> Period {
        Period::of_date(self.date)
    }
}

/// One owner's totals for a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub owner: String,
    pub posts: u64,
    pub impressions: u64,
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
}

/// Ranked owners plus the impressions they add up to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    /// `None` for the all-time board.
    pub period: Option<Period>,
    pub total_impressions: u64,
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn new(period: Option<Period>, entries: Vec<LeaderboardEntry>) -> Self {
        let total_impressions = entries.iter().map(|e| e.impressions).sum();
        Self {
            period,
            total_impressions,
            entries,
        }
    }
}

/// Row counts and freshness of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub posts: u64,
    pub snapshots: u64,
    pub posts_last_updated: Option<DateTime<Utc>>,
    pub snapshots_last_updated: Option<DateTime<Utc>>,
}
