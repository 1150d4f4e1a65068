//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::time::Instant;

use crate::detector::FailureClass;
use crate::error::AppError;
use crate::harvester::{HarvestEvent, HarvestReporter};
use crate::models::{DailySnapshot, Metrics, MetricsRecord, Period, StoreStats, WorkItem};
use crate::traits::{ExtractorFactory, IngestionStore, MetricsExtractor};

pub fn make_item(id: &str) -> WorkItem {
    WorkItem {
        external_id: id.to_string(),
        url: format!("https://x.com/user_{id}/status/{id}"),
        owner: "alice".to_string(),
        period: Period::current(),
    }
}

pub fn make_metrics(impressions: u64) -> Metrics {
    Metrics {
        impressions,
        likes: 1,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// MockExtractorFactory / MockExtractor
// ---------------------------------------------------------------------------

/// Scripted result of one extraction.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Metrics(Metrics),
    /// Fails with `AppError::ExtractionFailed(reason)`.
    Fail(String),
    /// Never completes.
    Hang,
}

type Scripts = Arc<Mutex<HashMap<String, Vec<MockOutcome>>>>;

/// Factory whose extractors answer from per-URL scripts.
///
/// Each call pops the front of the URL's script; the last entry repeats.
/// URLs without a script succeed with default metrics.
#[derive(Clone, Default)]
pub struct MockExtractorFactory {
    scripts: Scripts,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    max_opens: Arc<Mutex<Option<usize>>>,
}

impl MockExtractorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, outcomes: Vec<MockOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), outcomes);
    }

    /// Opens beyond the first `n` fail.
    pub fn fail_opens_after(&self, n: usize) {
        *self.max_opens.lock().unwrap() = Some(n);
    }

    /// Successfully opened sessions.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every extract call with the URL and the (paused-clock) time it was made.
    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ExtractorFactory for MockExtractorFactory {
    type Extractor = MockExtractor;

    async fn open(&self) -> Result<MockExtractor, AppError> {
        if let Some(max) = *self.max_opens.lock().unwrap() {
            if self.opened() >= max {
                return Err(AppError::NetworkError("browser failed to launch".into()));
            }
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockExtractor {
            scripts: Arc::clone(&self.scripts),
            calls: Arc::clone(&self.calls),
            closed: Arc::clone(&self.closed),
        })
    }
}

pub struct MockExtractor {
    scripts: Scripts,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
    closed: Arc<AtomicUsize>,
}

impl MetricsExtractor for MockExtractor {
    async fn extract(&self, url: &str) -> Result<Metrics, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        let outcome = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(script) if script.len() > 1 => Some(script.remove(0)),
                Some(script) => script.first().cloned(),
                None => None,
            }
        };

        match outcome {
            None => Ok(Metrics::default()),
            Some(MockOutcome::Metrics(metrics)) => Ok(metrics),
            Some(MockOutcome::Fail(reason)) => Err(AppError::ExtractionFailed(reason)),
            Some(MockOutcome::Hang) => std::future::pending().await,
        }
    }

    async fn close(self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory store keyed on `external_id`, in registration order.
#[derive(Clone, Default)]
pub struct MockStore {
    records: Arc<Mutex<Vec<MetricsRecord>>>,
    snapshots: Arc<Mutex<Vec<DailySnapshot>>>,
    upsert_error: Arc<Mutex<Option<AppError>>>,
    work_items_error: Arc<Mutex<Option<AppError>>>,
    always_fail_work_items: Arc<Mutex<Option<String>>>,
    queries: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Store with the given items registered at zero counts.
    pub fn with_items(items: Vec<WorkItem>) -> Self {
        let store = Self::default();
        let now = Utc::now();
        *store.records.lock().unwrap() = items
            .into_iter()
            .map(|item| MetricsRecord::new(item, Metrics::default(), now))
            .collect();
        store
    }

    /// The next `upsert` fails without writing anything.
    pub fn fail_next_upsert(&self, error: AppError) {
        *self.upsert_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_work_items(&self, error: AppError) {
        *self.work_items_error.lock().unwrap() = Some(error);
    }

    /// Every `work_items` call fails with a database error.
    pub fn fail_all_work_items(&self, reason: &str) {
        *self.always_fail_work_items.lock().unwrap() = Some(reason.to_string());
    }

    pub fn record(&self, external_id: &str) -> Option<MetricsRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.item.external_id == external_id)
            .cloned()
    }

    /// Number of `query` calls made so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl IngestionStore for MockStore {
    async fn work_items(&self, period: Period) -> Result<Vec<WorkItem>, AppError> {
        if let Some(reason) = self.always_fail_work_items.lock().unwrap().clone() {
            return Err(AppError::DatabaseError(reason));
        }
        if let Some(e) = self.work_items_error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.item.period == period)
            .map(|r| r.item.clone())
            .collect())
    }

    async fn register(&self, item: &WorkItem) -> Result<bool, AppError> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.item.external_id == item.external_id)
        {
            return Ok(false);
        }
        records.push(MetricsRecord::new(item.clone(), Metrics::default(), Utc::now()));
        Ok(true)
    }

    async fn upsert(&self, batch: &[MetricsRecord]) -> Result<usize, AppError> {
        if let Some(e) = self.upsert_error.lock().unwrap().take() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        for incoming in batch {
            match records
                .iter_mut()
                .find(|r| r.item.external_id == incoming.item.external_id)
            {
                Some(existing) => {
                    existing.metrics = incoming.metrics.clone();
                    existing.observed_at = incoming.observed_at;
                    existing.last_updated = now;
                }
                None => {
                    let mut record = incoming.clone();
                    record.last_updated = now;
                    records.push(record);
                }
            }
        }
        Ok(batch.len())
    }

    async fn reassign_owner(&self, external_id: &str, new_owner: &str) -> Result<bool, AppError> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.item.external_id == external_id)
        {
            Some(record) => {
                record.item.owner = new_owner.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query(&self, period: Option<Period>) -> Result<Vec<MetricsRecord>, AppError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<MetricsRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| period.is_none_or(|p| r.item.period == p))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        Ok(rows)
    }

    async fn available_periods(&self) -> Result<Vec<Period>, AppError> {
        let mut periods: Vec<Period> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.item.period)
            .collect();
        periods.sort_by(|a, b| b.cmp(a));
        periods.dedup();
        Ok(periods)
    }

    async fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<(), AppError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.retain(|s| s.date != snapshot.date);
        snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn snapshots(&self, period: Period) -> Result<Vec<DailySnapshot>, AppError> {
        let mut rows: Vec<DailySnapshot> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.period() == period)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.date);
        Ok(rows)
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        let records = self.records.lock().unwrap();
        let snapshots = self.snapshots.lock().unwrap();
        Ok(StoreStats {
            posts: records.len() as u64,
            snapshots: snapshots.len() as u64,
            posts_last_updated: records.iter().map(|r| r.last_updated).max(),
            snapshots_last_updated: None,
        })
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records event names for assertions.
#[derive(Default)]
pub struct MockReporter {
    events: Mutex<Vec<String>>,
    blocking_failures: AtomicUsize,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == name)
            .count()
    }

    pub fn blocking_failures(&self) -> usize {
        self.blocking_failures.load(Ordering::SeqCst)
    }
}

impl HarvestReporter for MockReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        if let HarvestEvent::ItemFailed {
            class: FailureClass::Blocking,
            ..
        } = event
        {
            self.blocking_failures.fetch_add(1, Ordering::SeqCst);
        }
        let debug = format!("{event:?}");
        let name = debug
            .split([' ', '{', '('])
            .next()
            .unwrap_or_default()
            .to_string();
        self.events.lock().unwrap().push(name);
    }
}
