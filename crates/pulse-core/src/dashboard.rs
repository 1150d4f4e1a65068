//! Read side: cached aggregates over the ingestion store, plus the submission
//! and attribution writes that share the same cache.
//!
//! Every cached read follows the same shape: cache hit, else compute from the
//! store and remember. Every write clears the whole cache.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};

use crate::cache::AggregateCache;
use crate::error::AppError;
use crate::models::{DailySnapshot, Leaderboard, LeaderboardEntry, MetricsRecord, Period, WorkItem};
use crate::traits::IngestionStore;

/// Values held by the aggregate cache.
#[derive(Debug, Clone)]
pub enum Aggregate {
    Leaderboard(Leaderboard),
    Periods(Vec<Period>),
    DailySeries(Vec<DailySnapshot>),
}

fn leaderboard_key(period: Option<Period>, excluded: &[Period]) -> String {
    let mut key = match period {
        Some(p) => format!("leaderboard_{p}"),
        None => "leaderboard_all".to_string(),
    };
    if !excluded.is_empty() {
        let list: Vec<String> = excluded.iter().map(Period::to_string).collect();
        key.push_str("_excl_");
        key.push_str(&list.join(","));
    }
    key
}

const PERIODS_KEY: &str = "available_periods";

fn daily_series_key(period: Period) -> String {
    format!("daily_series_{period}")
}

/// Per-owner totals, highest impressions first (ties by owner name).
pub fn rank_owners(records: &[MetricsRecord]) -> Vec<LeaderboardEntry> {
    let mut by_owner: HashMap<&str, LeaderboardEntry> = HashMap::new();
    for record in records {
        let entry = by_owner
            .entry(record.item.owner.as_str())
            .or_insert_with(|| LeaderboardEntry {
                owner: record.item.owner.clone(),
                posts: 0,
                impressions: 0,
                likes: 0,
                reposts: 0,
                replies: 0,
            });
        entry.posts += 1;
        entry.impressions += record.metrics.impressions;
        entry.likes += record.metrics.likes;
        entry.reposts += record.metrics.reposts;
        entry.replies += record.metrics.replies;
    }

    let mut entries: Vec<LeaderboardEntry> = by_owner.into_values().collect();
    entries.sort_by(|a, b| {
        b.impressions
            .cmp(&a.impressions)
            .then_with(|| a.owner.cmp(&b.owner))
    });
    entries
}

/// Totals across every record, stamped with `date`.
pub fn daily_totals(date: NaiveDate, records: &[MetricsRecord]) -> DailySnapshot {
    records.iter().fold(
        DailySnapshot {
            date,
            impressions: 0,
            likes: 0,
            reposts: 0,
            replies: 0,
            posts: 0,
        },
        |mut acc, record| {
            acc.impressions += record.metrics.impressions;
            acc.likes += record.metrics.likes;
            acc.reposts += record.metrics.reposts;
            acc.replies += record.metrics.replies;
            acc.posts += 1;
            acc
        },
    )
}

#[derive(Clone)]
pub struct Dashboard<S: IngestionStore> {
    store: S,
    cache: AggregateCache<Aggregate>,
    /// Months kept off every leaderboard, sorted.
    excluded: Vec<Period>,
}

impl<S: IngestionStore> Dashboard<S> {
    /// `cache` should be shared with the harvester so its writes invalidate
    /// what is served here.
    pub fn new(store: S, cache: AggregateCache<Aggregate>) -> Self {
        Self {
            store,
            cache,
            excluded: Vec::new(),
        }
    }

    /// Months to leave out of leaderboards. An excluded month ranks nobody
    /// and its posts do not count towards the all-time board.
    pub fn with_excluded_periods(mut self, periods: impl IntoIterator<Item = Period>) -> Self {
        self.excluded = periods.into_iter().collect();
        self.excluded.sort();
        self.excluded.dedup();
        self
    }

    pub fn excluded_periods(&self) -> &[Period] {
        &self.excluded
    }

    pub fn cache(&self) -> &AggregateCache<Aggregate> {
        &self.cache
    }

    pub async fn leaderboard(&self, period: Option<Period>) -> Result<Leaderboard, AppError> {
        let key = leaderboard_key(period, &self.excluded);
        if let Some(Aggregate::Leaderboard(board)) = self.cache.get(&key) {
            return Ok(board);
        }

        let board = match period {
            Some(p) if self.excluded.contains(&p) => {
                tracing::debug!(period = %p, "Period excluded from leaderboard");
                Leaderboard::new(period, Vec::new())
            }
            _ => {
                let mut records = self.store.query(period).await?;
                records.retain(|r| !self.excluded.contains(&r.item.period));
                Leaderboard::new(period, rank_owners(&records))
            }
        };
        self.cache.set(key, Aggregate::Leaderboard(board.clone()));
        Ok(board)
    }

    /// Periods with data, newest first. Falls back to the current month when
    /// the store is empty.
    pub async fn available_periods(&self) -> Result<Vec<Period>, AppError> {
        if let Some(Aggregate::Periods(periods)) = self.cache.get(PERIODS_KEY) {
            return Ok(periods);
        }

        let mut periods = self.store.available_periods().await?;
        if periods.is_empty() {
            periods.push(Period::current());
        }
        self.cache.set(PERIODS_KEY, Aggregate::Periods(periods.clone()));
        Ok(periods)
    }

    pub async fn daily_series(&self, period: Period) -> Result<Vec<DailySnapshot>, AppError> {
        let key = daily_series_key(period);
        if let Some(Aggregate::DailySeries(series)) = self.cache.get(&key) {
            return Ok(series);
        }

        let series = self.store.snapshots(period).await?;
        self.cache.set(key, Aggregate::DailySeries(series.clone()));
        Ok(series)
    }

    /// Stores today's totals for the month `date` falls in. Re-recording the
    /// same day replaces it.
    pub async fn record_daily_snapshot(&self, date: NaiveDate) -> Result<DailySnapshot, AppError> {
        let period = Period::of_date(date);
        let records = self.store.query(Some(period)).await?;
        let snapshot = daily_totals(date, &records);

        self.store.upsert_snapshot(&snapshot).await?;
        self.cache.invalidate_all();
        tracing::info!(
            %date,
            posts = snapshot.posts,
            impressions = snapshot.impressions,
            "Daily snapshot recorded"
        );
        Ok(snapshot)
    }

    pub async fn record_today(&self) -> Result<DailySnapshot, AppError> {
        self.record_daily_snapshot(Utc::now().date_naive()).await
    }

    /// Registers a submitted post for the current month. Returns false if it
    /// was already registered.
    pub async fn submit(&self, owner: &str, url: &str) -> Result<bool, AppError> {
        let item = WorkItem::from_url(owner, url, Period::current())?;
        let inserted = self.store.register(&item).await?;
        if inserted {
            self.cache.invalidate_all();
            tracing::info!(
                external_id = %item.external_id,
                owner = %item.owner,
                "Post registered"
            );
        } else {
            tracing::info!(external_id = %item.external_id, "Post already registered");
        }
        Ok(inserted)
    }

    /// Manual attribution fix. Returns false if the post is unknown.
    pub async fn reassign_owner(&self, external_id: &str, owner: &str) -> Result<bool, AppError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(AppError::Generic("Owner must not be empty".into()));
        }
        let changed = self.store.reassign_owner(external_id, owner).await?;
        if changed {
            self.cache.invalidate_all();
        }
        Ok(changed)
    }
}
