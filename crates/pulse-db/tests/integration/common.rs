use chrono::{DateTime, TimeZone, Utc};
use pulse_core::models::{Metrics, MetricsRecord, Period, WorkItem};
use pulse_db::{Database, DatabaseConfig, PostRepository};

/// Opens a fresh in-memory database with the schema applied.
pub async fn setup_test_db() -> Database {
    Database::open(&DatabaseConfig::in_memory())
        .await
        .expect("Failed to open in-memory database")
}

pub async fn setup_repo() -> PostRepository {
    setup_test_db().await.post_repo()
}

pub fn october() -> Period {
    Period::new(2026, 10).unwrap()
}

pub fn item(id: &str, owner: &str, period: Period) -> WorkItem {
    WorkItem {
        external_id: id.to_string(),
        url: format!("https://x.com/{owner}/status/{id}"),
        owner: owner.to_string(),
        period,
    }
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
}

pub fn record(item: WorkItem, impressions: u64, observed_at: DateTime<Utc>) -> MetricsRecord {
    MetricsRecord::new(
        item,
        Metrics {
            impressions,
            likes: impressions / 10,
            reposts: 1,
            replies: 2,
            ..Default::default()
        },
        observed_at,
    )
}
