use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use pulse_core::error::AppError;
use pulse_core::models::{DailySnapshot, Metrics, MetricsRecord, Period, StoreStats, WorkItem};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// SQLite stores signed 64-bit integers.
fn to_sql(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn from_sql(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

/// Repository for post metrics and daily snapshots in SQLite.
///
/// Writes are serialized behind one lock and each batch runs in a single
/// transaction, so readers see a batch entirely or not at all.
#[derive(Clone)]
pub struct PostRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl PostRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_write_lock(pool, Arc::new(Mutex::new(())))
    }

    pub fn with_write_lock(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Items registered for `period`, oldest registration first.
    pub async fn work_items(&self, period: Period) -> Result<Vec<WorkItem>, AppError> {
        let rows = sqlx::query_as::<_, WorkItemRow>(
            r#"
            SELECT external_id, url, owner, period
            FROM posts
            WHERE period = ?1
            ORDER BY submitted_at ASC, rowid ASC
            "#,
        )
        .bind(period.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Registers a post with zero counts. Existing rows are left alone.
    pub async fn register(&self, item: &WorkItem) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO posts (external_id, url, owner, period, submitted_at, observed_at, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(&item.external_id)
        .bind(&item.url)
        .bind(&item.owner)
        .bind(item.period.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    /// Insert-or-update a batch in one transaction.
    ///
    /// On conflict only the counts, `observed_at` and `last_updated` change;
    /// `posted_at` and `author_handle` are filled in when the new record knows
    /// them. Owner, URL and period stay as first registered.
    pub async fn upsert(&self, records: &[MetricsRecord]) -> Result<usize, AppError> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for record in records {
            let m = &record.metrics;
            sqlx::query(
                r#"
                INSERT INTO posts (
                    external_id, url, owner, period,
                    impressions, likes, reposts, replies,
                    posted_at, author_handle,
                    submitted_at, observed_at, last_updated
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?11)
                ON CONFLICT(external_id) DO UPDATE SET
                    impressions   = excluded.impressions,
                    likes         = excluded.likes,
                    reposts       = excluded.reposts,
                    replies       = excluded.replies,
                    posted_at     = COALESCE(excluded.posted_at, posts.posted_at),
                    author_handle = COALESCE(excluded.author_handle, posts.author_handle),
                    observed_at   = excluded.observed_at,
                    last_updated  = excluded.last_updated
                "#,
            )
            .bind(&record.item.external_id)
            .bind(&record.item.url)
            .bind(&record.item.owner)
            .bind(record.item.period.to_string())
            .bind(to_sql(m.impressions))
            .bind(to_sql(m.likes))
            .bind(to_sql(m.reposts))
            .bind(to_sql(m.replies))
            .bind(m.posted_at)
            .bind(m.author_handle.as_deref())
            .bind(now)
            .bind(record.observed_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(count = records.len(), "Upserted metrics batch");
        Ok(records.len())
    }

    pub async fn reassign_owner(&self, external_id: &str, new_owner: &str) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            r#"
            UPDATE posts SET owner = ?2, last_updated = ?3
            WHERE external_id = ?1
            "#,
        )
        .bind(external_id)
        .bind(new_owner)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    /// All records (optionally for one period), most recently observed first.
    pub async fn query(&self, period: Option<Period>) -> Result<Vec<MetricsRecord>, AppError> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT external_id, url, owner, period,
                   impressions, likes, reposts, replies,
                   posted_at, author_handle, observed_at, last_updated
            FROM posts
            WHERE ?1 IS NULL OR period = ?1
            ORDER BY observed_at DESC, rowid DESC
            "#,
        )
        .bind(period.map(|p| p.to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn available_periods(&self) -> Result<Vec<Period>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT period FROM posts ORDER BY period DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        rows.into_iter().map(|(p,)| p.parse()).collect()
    }

    /// Stores a day's totals, replacing any earlier recording for that day.
    pub async fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;

        sqlx::query(
            r#"
            INSERT INTO daily_snapshots (date, impressions, likes, reposts, replies, posts, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(date) DO UPDATE SET
                impressions = excluded.impressions,
                likes       = excluded.likes,
                reposts     = excluded.reposts,
                replies     = excluded.replies,
                posts       = excluded.posts,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(snapshot.date)
        .bind(to_sql(snapshot.impressions))
        .bind(to_sql(snapshot.likes))
        .bind(to_sql(snapshot.reposts))
        .bind(to_sql(snapshot.replies))
        .bind(to_sql(snapshot.posts))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Snapshots for one month, oldest day first.
    pub async fn snapshots(&self, period: Period) -> Result<Vec<DailySnapshot>, AppError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT date, impressions, likes, reposts, replies, posts
            FROM daily_snapshots
            WHERE substr(date, 1, 7) = ?1
            ORDER BY date ASC
            "#,
        )
        .bind(period.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn stats(&self) -> Result<StoreStats, AppError> {
        let (posts, posts_last_updated): (i64, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT COUNT(*), MAX(last_updated) FROM posts")
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        let (snapshots, snapshots_last_updated): (i64, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT COUNT(*), MAX(recorded_at) FROM daily_snapshots")
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(StoreStats {
            posts: from_sql(posts),
            snapshots: from_sql(snapshots),
            posts_last_updated,
            snapshots_last_updated,
        })
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct WorkItemRow {
    external_id: String,
    url: String,
    owner: String,
    period: String,
}

impl TryFrom<WorkItemRow> for WorkItem {
    type Error = AppError;

    fn try_from(row: WorkItemRow) -> Result<Self, Self::Error> {
        Ok(WorkItem {
            external_id: row.external_id,
            url: row.url,
            owner: row.owner,
            period: row.period.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    external_id: String,
    url: String,
    owner: String,
    period: String,
    impressions: i64,
    likes: i64,
    reposts: i64,
    replies: i64,
    posted_at: Option<DateTime<Utc>>,
    author_handle: Option<String>,
    observed_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<PostRow> for MetricsRecord {
    type Error = AppError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(MetricsRecord {
            item: WorkItem {
                external_id: row.external_id,
                url: row.url,
                owner: row.owner,
                period: row.period.parse()?,
            },
            metrics: Metrics {
                impressions: from_sql(row.impressions),
                likes: from_sql(row.likes),
                reposts: from_sql(row.reposts),
                replies: from_sql(row.replies),
                posted_at: row.posted_at,
                author_handle: row.author_handle,
            },
            observed_at: row.observed_at,
            last_updated: row.last_updated,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    date: NaiveDate,
    impressions: i64,
    likes: i64,
    reposts: i64,
    replies: i64,
    posts: i64,
}

impl From<SnapshotRow> for DailySnapshot {
    fn from(row: SnapshotRow) -> Self {
        DailySnapshot {
            date: row.date,
            impressions: from_sql(row.impressions),
            likes: from_sql(row.likes),
            reposts: from_sql(row.reposts),
            replies: from_sql(row.replies),
            posts: from_sql(row.posts),
        }
    }
}

// -- Trait implementation --

impl pulse_core::traits::IngestionStore for PostRepository {
    async fn work_items(&self, period: Period) -> Result<Vec<WorkItem>, AppError> {
        PostRepository::work_items(self, period).await
    }

    async fn register(&self, item: &WorkItem) -> Result<bool, AppError> {
        PostRepository::register(self, item).await
    }

    async fn upsert(&self, records: &[MetricsRecord]) -> Result<usize, AppError> {
        PostRepository::upsert(self, records).await
    }

    async fn reassign_owner(&self, external_id: &str, new_owner: &str) -> Result<bool, AppError> {
        PostRepository::reassign_owner(self, external_id, new_owner).await
    }

    async fn query(&self, period: Option<Period>) -> Result<Vec<MetricsRecord>, AppError> {
        PostRepository::query(self, period).await
    }

    async fn available_periods(&self) -> Result<Vec<Period>, AppError> {
        PostRepository::available_periods(self).await
    }

    async fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<(), AppError> {
        PostRepository::upsert_snapshot(self, snapshot).await
    }

    async fn snapshots(&self, period: Period) -> Result<Vec<DailySnapshot>, AppError> {
        PostRepository::snapshots(self, period).await
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        PostRepository::stats(self).await
    }
}
