use chrono::NaiveDate;
use pulse_core::models::{DailySnapshot, Period};

use crate::integration::common::{october, setup_repo};

fn snapshot(day: u32, impressions: u64) -> DailySnapshot {
    DailySnapshot {
        date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
        impressions,
        likes: impressions / 2,
        reposts: 3,
        replies: 4,
        posts: 5,
    }
}

#[tokio::test]
async fn snapshots_are_ordered_by_day() {
    let repo = setup_repo().await;
    for s in [snapshot(14, 300), snapshot(2, 100), snapshot(9, 200)] {
        repo.upsert_snapshot(&s).await.unwrap();
    }

    let series = repo.snapshots(october()).await.unwrap();
    let days: Vec<u64> = series.iter().map(|s| s.impressions).collect();
    assert_eq!(days, vec![100, 200, 300]);
}

#[tokio::test]
async fn recording_the_same_day_replaces_it() {
    let repo = setup_repo().await;
    repo.upsert_snapshot(&snapshot(2, 100)).await.unwrap();
    repo.upsert_snapshot(&snapshot(2, 150)).await.unwrap();

    let series = repo.snapshots(october()).await.unwrap();
    assert_eq!(series, vec![snapshot(2, 150)]);

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.snapshots, 1);
    assert!(stats.snapshots_last_updated.is_some());
}

#[tokio::test]
async fn snapshots_filter_by_month() {
    let repo = setup_repo().await;
    repo.upsert_snapshot(&snapshot(2, 100)).await.unwrap();
    let november = DailySnapshot {
        date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
        ..snapshot(1, 999)
    };
    repo.upsert_snapshot(&november).await.unwrap();

    assert_eq!(repo.snapshots(october()).await.unwrap().len(), 1);
    let next = repo.snapshots(Period::new(2026, 11).unwrap()).await.unwrap();
    assert_eq!(next, vec![november]);
}
