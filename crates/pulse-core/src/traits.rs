use std::future::Future;

use crate::error::AppError;
use crate::models::{DailySnapshot, Metrics, MetricsRecord, Period, StoreStats, WorkItem};

/// An open extraction session (an HTTP client, a browser process, ...).
///
/// Sessions hold whatever state the target uses to fingerprint us, so the
/// harvester throws a session away and opens a fresh one after a block.
pub trait MetricsExtractor: Send + Sync {
    /// Reads the current counts for a post URL.
    ///
    /// Failures carry a human-readable reason; the harvester classifies it.
    fn extract(&self, url: &str) -> impl Future<Output = Result<Metrics, AppError>> + Send;

    /// Releases the session. Called exactly once per opened session.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens extraction sessions for the harvester.
pub trait ExtractorFactory: Send + Sync {
    type Extractor: MetricsExtractor;

    fn open(&self) -> impl Future<Output = Result<Self::Extractor, AppError>> + Send;
}

/// Durable keyed storage for harvested posts.
///
/// Implementations serialize writes; `upsert` must apply a batch atomically.
pub trait IngestionStore: Send + Sync + Clone {
    /// Items registered for the given period, in registration order.
    fn work_items(
        &self,
        period: Period,
    ) -> impl Future<Output = Result<Vec<WorkItem>, AppError>> + Send;

    /// Register a new item with zero counts. Returns false if it already exists.
    fn register(&self, item: &WorkItem) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Insert-or-update keyed on `external_id`. Identity fields of existing
    /// rows are left untouched. Returns the number of records written.
    fn upsert(
        &self,
        records: &[MetricsRecord],
    ) -> impl Future<Output = Result<usize, AppError>> + Send;

    /// Change the owner of an existing item. Returns false if no such item.
    fn reassign_owner(
        &self,
        external_id: &str,
        new_owner: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// All records, optionally restricted to a period, most recently observed first.
    fn query(
        &self,
        period: Option<Period>,
    ) -> impl Future<Output = Result<Vec<MetricsRecord>, AppError>> + Send;

    /// Distinct periods with data, newest first.
    fn available_periods(&self) -> impl Future<Output = Result<Vec<Period>, AppError>> + Send;

    fn upsert_snapshot(
        &self,
        snapshot: &DailySnapshot,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Snapshots for a period, oldest day first.
    fn snapshots(
        &self,
        period: Period,
    ) -> impl Future<Output = Result<Vec<DailySnapshot>, AppError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<StoreStats, AppError>> + Send;
}
