pub mod backoff;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod detector;
pub mod error;
pub mod harvester;
pub mod models;
pub mod owners;
pub mod pacing;
pub mod submission;
pub mod traits;

#[cfg(test)]
mod testutil;

pub use backoff::{BackoffPolicy, WaitOutcome};
pub use cache::{AggregateCache, CacheStats};
pub use config::HarvestConfig;
pub use dashboard::{Aggregate, Dashboard};
pub use detector::{BlockVerdict, BlockingDetector, FailureClass, SchedulerState, classify};
pub use error::AppError;
pub use harvester::{HarvestEvent, HarvestReporter, Harvester, TracingHarvestReporter};
pub use models::{
    DailySnapshot, Leaderboard, LeaderboardEntry, Metrics, MetricsRecord, Period, RunStats, StoreStats, WorkItem,
};
pub use owners::OwnerDirectory;
pub use pacing::PacingConfig;
pub use submission::{StatusRef, parse_status_url};
pub use traits::{ExtractorFactory, IngestionStore, MetricsExtractor};
