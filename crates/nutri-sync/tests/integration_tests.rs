//! Integration tests for the nutri-sync crate
//!
//! These tests exercise the complete offline flow: queueing while offline,
//! reconnecting, draining and reconciling the daily view.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use nutri_sync::{
    DailyStats, FixedClock, InFlightOverrides, InMemoryLocalStore, InMemoryRemoteStore, LocalStore,
    MutationQueue, NetworkSignal, OrchestratorConfig, Payload, Probe, ProbeError, QueueConfig,
    ReachabilityMonitor, RemoteStore, SqliteLocalStore, StatField, SyncConfig, SyncOrchestrator,
    WriteOutcome, compute_view, should_refresh,
};
use serde_json::json;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct AlwaysUp;

#[async_trait]
impl Probe for AlwaysUp {
    async fn probe(&self, _endpoint: &str) -> Result<(), ProbeError> {
        Ok(())
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, hour, minute, 0).unwrap()
}

fn water_payload(ml: u32) -> Payload {
    let mut payload = Payload::new();
    payload.insert("waterIntake".to_string(), json!(ml));
    payload
}

fn stats(date: NaiveDate, base: f64, meals: &[&str], updated: DateTime<Utc>) -> DailyStats {
    let mut s = DailyStats::zeroed(date);
    s.calories_consumed = base;
    s.protein_consumed = base + 1.0;
    s.carbs_consumed = base + 2.0;
    s.fat_consumed = base + 3.0;
    s.completed_meal_ids = meals.iter().map(|m| m.to_string()).collect();
    s.last_updated = updated;
    s
}

fn create_sqlite_store() -> (Arc<SqliteLocalStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = SqliteLocalStore::new(dir.path().join("nutri.db")).unwrap();
    (Arc::new(store), dir)
}

#[tokio::test]
async fn test_reconnect_drain_writes_absolute_value() {
    init_logging();
    let local: Arc<dyn LocalStore> = Arc::new(InMemoryLocalStore::new());
    let remote = InMemoryRemoteStore::new();
    remote
        .update("user/42", &water_payload(500))
        .await
        .unwrap();

    let queue = MutationQueue::open(local, QueueConfig::default()).unwrap();
    let monitor = ReachabilityMonitor::new(Default::default(), Arc::new(AlwaysUp), false);
    queue.enqueue("user/42", water_payload(750)).unwrap();

    monitor.manually_set_status(true);
    assert!(monitor.is_online());
    let report = queue.drain(&remote).await.unwrap();

    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(remote.field("user/42", "waterIntake"), Some(json!(750)));
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test]
async fn test_idempotent_drain() {
    init_logging();
    let queue = MutationQueue::open(
        Arc::new(InMemoryLocalStore::new()),
        QueueConfig::default(),
    )
    .unwrap();
    let remote = InMemoryRemoteStore::new();
    queue.enqueue("user/42", water_payload(250)).unwrap();
    queue.enqueue("user/42", water_payload(750)).unwrap();

    queue.drain(&remote).await.unwrap();
    let once = remote.document("user/42");

    let second = queue.drain(&remote).await.unwrap();
    assert!(second.succeeded.is_empty());
    assert_eq!(remote.document("user/42"), once);
    assert_eq!(remote.write_log().len(), 2);

    // Replaying an already-applied absolute write changes nothing
    remote.update("user/42", &water_payload(750)).await.unwrap();
    assert_eq!(remote.document("user/42"), once);
}

#[tokio::test]
async fn test_fifo_per_target_across_batches() {
    let queue = MutationQueue::open(
        Arc::new(InMemoryLocalStore::new()),
        QueueConfig::default(),
    )
    .unwrap();
    let remote = InMemoryRemoteStore::new();

    queue.enqueue("user/42", water_payload(100)).unwrap();
    remote.fail_next_writes(1);
    queue.drain(&remote).await.unwrap();

    queue.enqueue("user/42", water_payload(200)).unwrap();
    queue.drain(&remote).await.unwrap();

    let applied: Vec<_> = remote
        .write_log()
        .into_iter()
        .map(|(_, p)| p["waterIntake"].clone())
        .collect();
    assert_eq!(applied, vec![json!(100), json!(200)]);
    assert_eq!(remote.field("user/42", "waterIntake"), Some(json!(200)));
}

#[test]
fn test_day_rollover_replaces_never_merges() {
    let plan = stats(today().pred_opt().unwrap(), 1500.0, &["dinner"], at(0, 0));
    let user = stats(today(), 0.0, &[], at(7, 30));

    let view = compute_view(Some(&plan), Some(&user), &InFlightOverrides::new(), today());
    for field in [
        StatField::Calories,
        StatField::Protein,
        StatField::Carbs,
        StatField::Fat,
    ] {
        assert_eq!(view.get(field), user.get(field), "{:?}", field);
        assert_ne!(view.get(field), plan.get(field), "{:?}", field);
    }
    assert!(view.completed_meal_ids.is_empty());
    assert_eq!(view.date, today());
}

#[test]
fn test_union_of_completed_meals() {
    let plan = stats(today(), 0.0, &["A"], at(8, 0));
    let user = stats(today(), 0.0, &["B"], at(8, 0));
    let mut overrides = InFlightOverrides::new();
    overrides.complete_meal(today(), "A");
    overrides.complete_meal(today(), "C");

    let view = compute_view(Some(&plan), Some(&user), &overrides, today());
    let expected: BTreeSet<String> = ["A", "B", "C"].into_iter().map(String::from).collect();
    assert_eq!(view.completed_meal_ids, expected);
}

#[tokio::test]
async fn test_retry_exhaustion_never_reappears() {
    init_logging();
    let (local, _dir) = create_sqlite_store();
    let config = QueueConfig {
        max_retries: 2,
        ..QueueConfig::default()
    };
    let remote = InMemoryRemoteStore::new();
    remote.set_available(false);

    let queue = MutationQueue::open(local.clone(), config.clone()).unwrap();
    let id = queue.enqueue("user/42", water_payload(750)).unwrap();

    let mut failed = Vec::new();
    for _ in 0..3 {
        failed.extend(queue.drain(&remote).await.unwrap().failed);
    }
    assert_eq!(failed, vec![id]);
    assert_eq!(queue.pending_count(), 0);

    remote.set_available(true);
    assert!(queue.drain(&remote).await.unwrap().succeeded.is_empty());

    let reopened = MutationQueue::open(local, config).unwrap();
    assert_eq!(reopened.pending_count(), 0);
}

#[test]
fn test_should_refresh_thresholds() {
    let now = at(12, 0);
    let snapshot = stats(today(), 0.0, &[], at(11, 0));

    assert!(should_refresh(
        Some(&snapshot),
        Some(now - chrono::Duration::seconds(45)),
        now
    ));
    assert!(!should_refresh(
        Some(&snapshot),
        Some(now - chrono::Duration::seconds(10)),
        now
    ));
}

#[tokio::test]
async fn test_queue_survives_reload() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nutri.db");

    {
        let local = Arc::new(SqliteLocalStore::new(&path).unwrap());
        let queue = MutationQueue::open(local, QueueConfig::default()).unwrap();
        queue.enqueue("user/42", water_payload(250)).unwrap();
        queue.enqueue("plan/42", json!({"version": 2}).as_object().unwrap().clone()).unwrap();
        queue.enqueue("user/42", water_payload(750)).unwrap();
    }

    let local = Arc::new(SqliteLocalStore::new(&path).unwrap());
    let queue = MutationQueue::open(local, QueueConfig::default()).unwrap();
    assert_eq!(queue.pending_count(), 3);
    let targets: Vec<String> = queue.pending().into_iter().map(|m| m.target_path).collect();
    assert_eq!(targets, vec!["user/42", "plan/42", "user/42"]);

    let remote = InMemoryRemoteStore::new();
    let report = queue.drain(&remote).await.unwrap();
    assert_eq!(report.succeeded.len(), 3);
    assert_eq!(remote.field("user/42", "waterIntake"), Some(json!(750)));
    assert_eq!(remote.field("plan/42", "version"), Some(json!(2)));
}

#[tokio::test]
async fn test_offline_writes_across_restart_accumulate() {
    init_logging();
    let config = SyncConfig {
        orchestrator: OrchestratorConfig::for_user("42"),
        ..SyncConfig::default()
    };
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nutri.db");
    let remote = Arc::new(InMemoryRemoteStore::new());
    let open = || {
        SyncOrchestrator::open(
            &config,
            Arc::new(SqliteLocalStore::new(&path).unwrap()),
            remote.clone(),
            Arc::new(AlwaysUp),
            Arc::new(FixedClock::new(at(12, 0))),
            false,
        )
        .unwrap()
    };

    let before = open();
    before.log_water(250).await.unwrap();
    assert_eq!(before.view().water_intake, 250);
    drop(before);

    let after = open();
    assert_eq!(after.view().water_intake, 250);
    assert_eq!(after.pending_count(), 1);
    let outcome = after.log_water(250).await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Queued(_)));

    after.monitor().manually_set_status(true);
    let report = after.handle_reconnect().await.unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(
        remote.field("users/42", "dailyStats.waterIntake"),
        Some(json!(500))
    );
    assert_eq!(after.view().water_intake, 500);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_online_signals_trigger_one_drain() {
    init_logging();
    let config = SyncConfig {
        orchestrator: OrchestratorConfig::for_user("42"),
        ..SyncConfig::default()
    };
    let (local, _dir) = create_sqlite_store();
    let remote = Arc::new(InMemoryRemoteStore::new());
    let clock = Arc::new(FixedClock::new(at(12, 0)));
    let sync = SyncOrchestrator::open(
        &config,
        local,
        remote.clone(),
        Arc::new(AlwaysUp),
        clock,
        false,
    )
    .unwrap();

    let outcome = sync.log_water(750).await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Queued(_)));

    let tasks = sync.start();
    let monitor = sync.monitor().clone();
    let (a, b) = tokio::join!(
        monitor.handle_signal(NetworkSignal::Online),
        monitor.handle_signal(NetworkSignal::Online)
    );
    assert!(a && b);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sync.pending_count(), 0);
    assert_eq!(remote.write_log().len(), 1);
    assert_eq!(
        remote.field("users/42", "dailyStats.waterIntake"),
        Some(json!(750))
    );
    assert_eq!(sync.view().water_intake, 750);
    drop(tasks);
}

#[tokio::test(start_paused = true)]
async fn test_timer_drain_retries_while_online() {
    init_logging();
    let config = SyncConfig {
        orchestrator: OrchestratorConfig::for_user("42"),
        ..SyncConfig::default()
    };
    let remote = Arc::new(InMemoryRemoteStore::new());
    let sync = SyncOrchestrator::open(
        &config,
        Arc::new(InMemoryLocalStore::new()),
        remote.clone(),
        Arc::new(AlwaysUp),
        Arc::new(FixedClock::new(at(12, 0))),
        true,
    )
    .unwrap();

    remote.fail_next_writes(2);
    assert!(matches!(
        sync.log_water(250).await.unwrap(),
        WriteOutcome::Queued(_)
    ));

    let _tasks = sync.start();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(sync.pending_count(), 0);
    assert_eq!(
        remote.field("users/42", "dailyStats.waterIntake"),
        Some(json!(250))
    );
}

#[test]
fn test_config_file_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sync.json");
    std::fs::write(
        &path,
        r#"{ "queue": { "max_retries": 3 }, "refresh": { "stale_after_ms": 45000 } }"#,
    )
    .unwrap();

    let config = SyncConfig::from_file(&path).unwrap();
    assert_eq!(config.queue.max_retries, 3);
    assert_eq!(config.refresh.stale_after_ms, 45_000);
    assert_eq!(config.monitor.settle_delay_ms, 1_000);
}
