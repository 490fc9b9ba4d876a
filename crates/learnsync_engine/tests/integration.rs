//! Integration tests for the queue, processor and sync manager.

use learnsync_engine::{
    ConnectivityMonitor, MemoryQueueStore, MemoryRemote, PersistentQueueStore, QueueProcessor,
    QueueStore, RetryConfig, SyncConfig, SyncManager,
};
use learnsync_protocol::{
    Action, Domain, ProgressRecord, SyncOperation, SyncPayload, TaskAttemptRecord, UserStats,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::sleep;

fn fast_retry() -> RetryConfig {
    RetryConfig::new(3)
        .with_initial_delay(Duration::from_millis(50))
        .with_jitter(false)
}

fn progress_op(day: u32, timestamp: u64) -> SyncOperation {
    SyncOperation::at(
        "learner",
        Action::Update,
        SyncPayload::Progress(ProgressRecord::new(day)),
        3,
        timestamp,
    )
}

fn manager_with(
    config: SyncConfig,
    store: Arc<dyn QueueStore>,
    remote: Arc<MemoryRemote>,
    online: bool,
) -> Arc<SyncManager> {
    let manager = SyncManager::new(config, store, remote, ConnectivityMonitor::new(online));
    manager.initialize("learner");
    manager
}

#[test]
fn persistent_queue_keeps_order_across_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sync").join("queue.journal");

    let timestamps = [50u64, 10, 40, 10, 30];
    let mut expected: Vec<(u64, String)> = Vec::new();
    {
        let store = PersistentQueueStore::open(&path).unwrap();
        for (i, ts) in timestamps.iter().enumerate() {
            let op = progress_op(i as u32 + 1, *ts);
            expected.push((*ts, op.id.clone()));
            store.add(op).unwrap();
        }
        assert_eq!(store.size().unwrap(), timestamps.len());
    }
    // Stable sort keeps insertion order for equal timestamps.
    expected.sort_by_key(|(ts, _)| *ts);

    let store = PersistentQueueStore::open(&path).unwrap();
    let ids: Vec<String> = store.get_all().unwrap().into_iter().map(|op| op.id).collect();
    let expected: Vec<String> = expected.into_iter().map(|(_, id)| id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test(start_paused = true)]
async fn drain_applies_and_second_drain_is_noop() {
    let dir = tempdir().unwrap();
    let store = Arc::new(PersistentQueueStore::open(&dir.path().join("q.journal")).unwrap());
    let remote = Arc::new(MemoryRemote::new());
    let processor = QueueProcessor::new(
        store.clone(),
        remote.clone(),
        SyncConfig::new().with_retry(fast_retry()),
    );

    store.add(progress_op(1, 1)).unwrap();
    store.add(progress_op(2, 2)).unwrap();

    let report = processor.process_queue().await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(store.size().unwrap(), 0);
    assert_eq!(store.journal_size().unwrap(), 0);

    let report = processor.process_queue().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(remote.calls("upsert"), 2);
}

#[tokio::test(start_paused = true)]
async fn always_failing_write_dropped_after_three_attempts() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_always("network request failed");
    let manager = manager_with(
        SyncConfig::new()
            .with_retry(fast_retry())
            .with_max_retries(3)
            .with_process_interval(None),
        store.clone(),
        remote.clone(),
        true,
    );

    manager.sync_user_stats(UserStats::default()).unwrap();
    let report = manager.process_now().await.unwrap().unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(remote.write_attempts(), 3);
    assert_eq!(store.size().unwrap(), 0);
    assert_eq!(manager.stats().dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn debounced_edits_reach_remote_once() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(
        SyncConfig::new().with_process_interval(None),
        store.clone(),
        remote.clone(),
        true,
    );

    for code in ["v1", "v2", "v3"] {
        manager.sync_code(1, code).await.unwrap();
        sleep(Duration::from_millis(300)).await;
    }
    sleep(Duration::from_secs(2)).await;

    manager.process_now().await.unwrap();
    assert_eq!(remote.calls("upsert"), 1);
    match remote.record("learner", Domain::Progress, "day:1") {
        Some(SyncPayload::Progress(record)) => assert_eq!(record.code.as_deref(), Some("v3")),
        other => panic!("unexpected remote record: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn partial_edits_do_not_clobber_remote_fields() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(
        "learner",
        SyncPayload::Progress(ProgressRecord {
            completed_tasks: vec![1, 2],
            notes: Some("remote notes".into()),
            completed: true,
            updated_at: 1,
            ..ProgressRecord::new(5)
        }),
    );
    let manager = manager_with(
        SyncConfig::new().with_process_interval(None),
        store,
        remote.clone(),
        true,
    );

    manager.sync_code(5, "let x = 1;").await.unwrap();
    assert_eq!(manager.flush_all().await, 1);
    let report = manager.process_now().await.unwrap().unwrap();
    assert_eq!(report.conflicts, 1);

    match remote.record("learner", Domain::Progress, "day:5") {
        Some(SyncPayload::Progress(record)) => {
            assert_eq!(record.completed_tasks, vec![1, 2]);
            assert_eq!(record.code.as_deref(), Some("let x = 1;"));
            assert_eq!(record.notes.as_deref(), Some("remote notes"));
            assert!(record.completed);
        }
        other => panic!("unexpected remote record: {other:?}"),
    }
}

#[test]
fn online_callback_fires_once_per_reconnect() {
    let monitor = ConnectivityMonitor::new(true);
    let fired = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fired);
    let _subscription = monitor.on_online(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    monitor.set_online(false);
    monitor.set_online(false);
    monitor.set_online(true);
    monitor.set_online(true);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn background_loop_drains_on_reconnect() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(
        SyncConfig::new().with_process_interval(None),
        store.clone(),
        remote.clone(),
        false,
    );
    let handle = manager.start();

    manager.sync_day_completion(1, true).await.unwrap();
    manager
        .sync_task_attempt(TaskAttemptRecord {
            attempt_id: "a-1".into(),
            day: 1,
            code: "print(1)".into(),
            passed: true,
            ..TaskAttemptRecord::default()
        })
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.size().unwrap(), 2);

    manager.connectivity().set_online(true);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.size().unwrap(), 0);
    assert_eq!(remote.len(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn background_loop_drains_after_enqueue_and_on_interval() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(
        SyncConfig::new()
            .with_retry(fast_retry())
            .with_max_retries(5)
            .with_process_interval(Some(Duration::from_secs(30))),
        store.clone(),
        remote.clone(),
        true,
    );
    let handle = manager.start();

    manager.sync_task_completion(1, vec![1]).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.size().unwrap(), 0);

    remote.fail_fetches("timeout");
    manager.sync_task_completion(2, vec![1]).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.size().unwrap(), 1);
    assert_eq!(store.get_all().unwrap()[0].retries, 1);

    remote.recover();
    sleep(Duration::from_secs(31)).await;
    assert_eq!(store.size().unwrap(), 0);

    handle.shutdown().await;
    manager.sync_task_completion(3, vec![1]).await.unwrap();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(store.size().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_process_now_runs_one_pass() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(2, "503 service unavailable");
    let manager = manager_with(
        SyncConfig::new()
            .with_retry(fast_retry())
            .with_process_interval(None),
        store,
        remote.clone(),
        true,
    );
    manager.sync_user_stats(UserStats::default()).unwrap();

    let (a, b) = tokio::join!(manager.process_now(), manager.process_now());
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

    assert_eq!(a, b);
    assert_eq!(a.succeeded, 1);
    assert_eq!(remote.write_attempts(), 3);
    assert_eq!(manager.stats().cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn flushed_edits_to_one_day_both_reach_remote() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(
        SyncConfig::new().with_process_interval(None),
        store.clone(),
        remote.clone(),
        false,
    );

    manager.sync_code(1, "code").await.unwrap();
    manager.sync_notes(1, "notes").await.unwrap();
    assert_eq!(manager.flush_all().await, 2);

    let queued = store.get_all().unwrap();
    assert!(queued[0].timestamp < queued[1].timestamp);

    manager.connectivity().set_online(true);
    let report = manager.process_now().await.unwrap().unwrap();
    assert_eq!(report.succeeded, 2);
    match remote.record("learner", Domain::Progress, "day:1") {
        Some(SyncPayload::Progress(record)) => {
            assert_eq!(record.code.as_deref(), Some("code"));
            assert_eq!(record.notes.as_deref(), Some("notes"));
        }
        other => panic!("unexpected remote record: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn back_to_back_completions_both_reach_remote() {
    let store = Arc::new(MemoryQueueStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(
        SyncConfig::new().with_process_interval(None),
        store,
        remote.clone(),
        true,
    );

    manager.sync_task_completion(2, vec![1, 2]).await.unwrap();
    manager.sync_day_completion(2, true).await.unwrap();
    manager.process_now().await.unwrap();

    match remote.record("learner", Domain::Progress, "day:2") {
        Some(SyncPayload::Progress(record)) => {
            assert_eq!(record.completed_tasks, vec![1, 2]);
            assert!(record.completed);
        }
        other => panic!("unexpected remote record: {other:?}"),
    }
}
