mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use helpers::{aggregated_jobs, seed_usage_record, TestDb, UsageRecord};
use sgas::aggregation::scheduler::{SchedulerConfig, SchedulerPhase, UpdateScheduler};
use sgas::aggregation::store::SqlAggregationStore;
use sgas::aggregation::{InsertNotify, PendingUpdateKey};

fn key(machine: &str) -> PendingUpdateKey {
    PendingUpdateKey::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), machine)
}

fn record<'a>(record_id: &'a str, machine_name: &'a str, user: &'a str) -> UsageRecord<'a> {
    UsageRecord {
        record_id,
        insert_date: "2025-03-01",
        machine_name,
        global_user_name: Some(user),
        vo_name: Some("atlas"),
        cpu_duration: 3600,
        wall_duration: 7200,
    }
}

fn manual_config() -> SchedulerConfig {
    SchedulerConfig {
        delay: Duration::from_secs(3600),
        busy_delay: Duration::from_secs(3600),
        shutdown_timeout: Some(Duration::from_secs(5)),
    }
}

async fn wait_until_drained(store: &SqlAggregationStore) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while store.pending_count().await.expect("count pending") > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pending updates were not drained");
}

#[tokio::test]
async fn test_run_now_drains_pending_updates() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    seed_usage_record(db, record("r1", "ce1.example.org", "/CN=Alice")).await;
    seed_usage_record(db, record("r2", "ce1.example.org", "/CN=Bob")).await;
    seed_usage_record(db, record("r3", "ce2.example.org", "/CN=Alice")).await;
    SqlAggregationStore::mark_pending(db, &key("ce1.example.org"))
        .await
        .unwrap();
    SqlAggregationStore::mark_pending(db, &key("ce2.example.org"))
        .await
        .unwrap();

    let store = Arc::new(SqlAggregationStore::new(db.clone()));
    let scheduler = UpdateScheduler::start(store.clone(), manual_config());

    assert_eq!(scheduler.run_now().await.unwrap(), 2);
    assert_eq!(store.pending_count().await.unwrap(), 0);
    assert_eq!(aggregated_jobs(db, "ce1.example.org").await, 2);
    assert_eq!(aggregated_jobs(db, "ce2.example.org").await, 1);

    // nothing left: a second pass is a no-op
    assert_eq!(scheduler.run_now().await.unwrap(), 0);

    scheduler.stop().await.unwrap();
    assert_eq!(scheduler.phase(), SchedulerPhase::Stopped);
}

#[tokio::test]
async fn test_startup_pass_picks_up_existing_work() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    seed_usage_record(db, record("r1", "ce1.example.org", "/CN=Alice")).await;
    SqlAggregationStore::mark_pending(db, &key("ce1.example.org"))
        .await
        .unwrap();

    let store = Arc::new(SqlAggregationStore::new(db.clone()));
    let config = SchedulerConfig {
        delay: Duration::from_millis(50),
        ..manual_config()
    };
    let scheduler = UpdateScheduler::start(store.clone(), config);

    wait_until_drained(&store).await;
    assert_eq!(aggregated_jobs(db, "ce1.example.org").await, 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_insert_notification_triggers_update() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let store = Arc::new(SqlAggregationStore::new(db.clone()));
    let config = SchedulerConfig {
        delay: Duration::from_millis(50),
        ..manual_config()
    };
    let scheduler = UpdateScheduler::start(store.clone(), config);

    // what the insertion path does after committing a batch
    seed_usage_record(db, record("r1", "ce3.example.org", "/CN=Carol")).await;
    SqlAggregationStore::mark_pending(db, &key("ce3.example.org"))
        .await
        .unwrap();
    let hook: &dyn InsertNotify = &scheduler;
    hook.notify_insert();
    hook.notify_insert();

    wait_until_drained(&store).await;
    assert_eq!(aggregated_jobs(db, "ce3.example.org").await, 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_rejects_run_now() {
    let test_db = TestDb::new().await;
    let store = Arc::new(SqlAggregationStore::new(test_db.connection().clone()));
    let scheduler = UpdateScheduler::start(store, manual_config());

    scheduler.stop().await.unwrap();
    scheduler.stop().await.unwrap();
    assert!(scheduler.run_now().await.is_err());
    // notifications after shutdown are ignored
    scheduler.notify();
    assert_eq!(scheduler.phase(), SchedulerPhase::Stopped);
}
