use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pulse_core::models::{Metrics, MetricsRecord, Period};
use pulse_db::{Database, DatabaseConfig};

use crate::integration::common::{at, item, october, record, setup_repo, setup_test_db};

#[tokio::test]
async fn upsert_twice_is_idempotent() {
    let repo = setup_repo().await;
    let r = record(item("100", "alice", october()), 500, at(3, 9));

    assert_eq!(repo.upsert(std::slice::from_ref(&r)).await.unwrap(), 1);
    assert_eq!(repo.upsert(std::slice::from_ref(&r)).await.unwrap(), 1);

    let rows = repo.query(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].external_id(), "100");
    assert_eq!(rows[0].metrics, r.metrics);
    assert_eq!(rows[0].observed_at, r.observed_at);
}

#[tokio::test]
async fn upsert_updates_counts_but_not_identity() {
    let repo = setup_repo().await;
    let original = item("100", "alice", october());
    assert!(repo.register(&original).await.unwrap());

    let mut impostor = original.clone();
    impostor.owner = "mallory".into();
    impostor.url = "https://x.com/mallory/status/100".into();
    repo.upsert(&[record(impostor, 900, at(4, 12))])
        .await
        .unwrap();

    let rows = repo.query(Some(october())).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].item, original);
    assert_eq!(rows[0].metrics.impressions, 900);
    assert_eq!(rows[0].metrics.likes, 90);
}

#[tokio::test]
async fn known_post_details_survive_sparse_updates() {
    let repo = setup_repo().await;
    let it = item("100", "alice", october());

    let detailed = MetricsRecord::new(
        it.clone(),
        Metrics {
            impressions: 10,
            posted_at: Some(at(1, 8)),
            author_handle: Some("alice_x".into()),
            ..Default::default()
        },
        at(2, 8),
    );
    repo.upsert(&[detailed]).await.unwrap();
    repo.upsert(&[record(it, 20, at(3, 8))]).await.unwrap();

    let row = repo.query(None).await.unwrap().remove(0);
    assert_eq!(row.metrics.impressions, 20);
    assert_eq!(row.metrics.posted_at, Some(at(1, 8)));
    assert_eq!(row.metrics.author_handle.as_deref(), Some("alice_x"));
}

#[tokio::test]
async fn failed_batch_writes_nothing() {
    let repo = setup_repo().await;
    let good = record(item("100", "alice", october()), 10, at(3, 9));
    let bad = record(item("", "alice", october()), 20, at(3, 9));

    let result = repo.upsert(&[good, bad]).await;

    assert!(result.unwrap_err().is_store_failure());
    assert!(repo.query(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn query_orders_by_observation_and_filters_period() {
    let repo = setup_repo().await;
    let september = Period::new(2026, 9).unwrap();
    repo.upsert(&[
        record(item("1", "alice", october()), 1, at(2, 0)),
        record(item("2", "bob", october()), 2, at(5, 0)),
        record(item("3", "carol", september), 3, at(9, 0)),
        record(item("4", "dave", october()), 4, at(3, 0)),
    ])
    .await
    .unwrap();

    let ids: Vec<String> = repo
        .query(Some(october()))
        .await
        .unwrap()
        .iter()
        .map(|r| r.external_id().to_string())
        .collect();
    assert_eq!(ids, vec!["2", "4", "1"]);

    let all = repo.query(None).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].external_id(), "3");
}

#[tokio::test]
async fn register_is_insert_if_absent() {
    let repo = setup_repo().await;
    let it = item("100", "alice", october());

    assert!(repo.register(&it).await.unwrap());
    repo.upsert(&[record(it.clone(), 700, at(6, 0))])
        .await
        .unwrap();

    let mut again = it.clone();
    again.owner = "bob".into();
    assert!(!repo.register(&again).await.unwrap());

    let row = repo.query(None).await.unwrap().remove(0);
    assert_eq!(row.item.owner, "alice");
    assert_eq!(row.metrics.impressions, 700);
}

#[tokio::test]
async fn work_items_follow_registration_order() {
    let repo = setup_repo().await;
    let september = Period::new(2026, 9).unwrap();
    for (id, period) in [("30", october()), ("10", october()), ("20", september), ("40", october())] {
        repo.register(&item(id, "alice", period)).await.unwrap();
    }

    let items = repo.work_items(october()).await.unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.external_id.as_str()).collect();
    assert_eq!(ids, vec!["30", "10", "40"]);
    assert!(items.iter().all(|i| i.period == october()));
}

#[tokio::test]
async fn reassign_owner_changes_only_owner() {
    let repo = setup_repo().await;
    repo.upsert(&[record(item("100", "alice", october()), 50, at(3, 9))])
        .await
        .unwrap();

    assert!(repo.reassign_owner("100", "bob").await.unwrap());
    assert!(!repo.reassign_owner("404", "bob").await.unwrap());

    let row = repo.query(None).await.unwrap().remove(0);
    assert_eq!(row.item.owner, "bob");
    assert_eq!(row.item.url, "https://x.com/alice/status/100");
    assert_eq!(row.metrics.impressions, 50);
}

#[tokio::test]
async fn available_periods_newest_first() {
    let repo = setup_repo().await;
    for (id, month) in [("1", 8), ("2", 10), ("3", 8), ("4", 9)] {
        let period = Period::new(2026, month).unwrap();
        repo.register(&item(id, "alice", period)).await.unwrap();
    }

    let periods: Vec<String> = repo
        .available_periods()
        .await
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(periods, vec!["2026-10", "2026-09", "2026-08"]);
}

#[tokio::test]
async fn stats_count_rows() {
    let repo = setup_repo().await;
    let empty = repo.stats().await.unwrap();
    assert_eq!(empty.posts, 0);
    assert!(empty.posts_last_updated.is_none());

    repo.register(&item("1", "alice", october())).await.unwrap();
    repo.register(&item("2", "bob", october())).await.unwrap();

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.posts, 2);
    assert_eq!(stats.snapshots, 0);
    assert!(stats.posts_last_updated.is_some());
}

#[tokio::test]
async fn file_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::new(dir.path().join("nested").join("pulse.db"));

    {
        let db = Database::open(&config).await.unwrap();
        db.post_repo()
            .upsert(&[record(item("100", "alice", october()), 42, at(3, 9))])
            .await
            .unwrap();
        db.pool().close().await;
    }

    let db = Database::open(&config).await.unwrap();
    let rows = db.post_repo().query(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].metrics.impressions, 42);
}

#[tokio::test]
async fn health_check_succeeds() {
    let repo = setup_repo().await;
    repo.health_check().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reader_sees_whole_batch_or_nothing() {
    const BATCH: usize = 500;
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&DatabaseConfig::new(dir.path().join("pulse.db")))
        .await
        .unwrap();
    let writer = db.post_repo();
    let reader = db.post_repo();
    let done = Arc::new(AtomicBool::new(false));

    let batch: Vec<MetricsRecord> = (0..BATCH)
        .map(|i| record(item(&(1000 + i).to_string(), "alice", october()), i as u64, at(3, 9)))
        .collect();

    let observer = {
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let finished = done.load(Ordering::SeqCst);
                seen.push(reader.query(None).await.unwrap().len());
                if finished {
                    return seen;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    tokio::task::yield_now().await;
    assert_eq!(writer.upsert(&batch).await.unwrap(), BATCH);
    done.store(true, Ordering::SeqCst);

    let seen = observer.await.unwrap();
    assert!(
        seen.iter().all(|&n| n == 0 || n == BATCH),
        "reader saw a partial batch: {seen:?}"
    );
    assert_eq!(seen.last(), Some(&BATCH));
}

#[tokio::test]
async fn in_memory_pool_keeps_its_only_connection() {
    let db = setup_test_db().await;
    let options = db.pool().options();

    assert_eq!(options.get_max_connections(), 1);
    assert_eq!(options.get_min_connections(), 1);
    assert!(options.get_idle_timeout().is_none());
    assert!(options.get_max_lifetime().is_none());
}
