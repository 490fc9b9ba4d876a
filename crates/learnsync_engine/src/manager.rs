//! Sync manager: the facade the application talks to.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::debounce::{callback, Callback, DebounceManager};
use crate::error::{SyncError, SyncResult};
use crate::processor::{DrainReport, ProcessorStats, QueueProcessor};
use crate::queue::QueueStore;
use crate::remote::RemoteService;
use learnsync_protocol::{
    now_millis, AchievementRecord, Action, Domain, ProfileRecord, ProgressRecord, SyncOperation,
    SyncPayload, TaskAttemptRecord, Timestamp, TopicMasteryRecord, UserStats,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Local data that predates the sync engine, imported by
/// [`SyncManager::sync_all_data`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDataBundle {
    /// Per-day progress.
    pub progress: Vec<ProgressRecord>,
    /// Unlocked achievements and stats.
    pub achievements: Option<AchievementRecord>,
    /// Profile fields.
    pub profile: Option<ProfileRecord>,
    /// Submitted task attempts.
    pub task_attempts: Vec<TaskAttemptRecord>,
    /// Per-topic mastery.
    pub topic_mastery: Vec<TopicMasteryRecord>,
}

impl LocalDataBundle {
    fn into_operations(self) -> Vec<(Action, SyncPayload)> {
        let mut operations = Vec::new();
        operations.extend(
            self.progress
                .into_iter()
                .map(|record| (Action::Update, SyncPayload::Progress(record))),
        );
        operations.extend(
            self.achievements
                .map(|record| (Action::Update, SyncPayload::Achievement(record))),
        );
        operations.extend(
            self.profile
                .map(|record| (Action::Update, SyncPayload::Profile(record))),
        );
        operations.extend(
            self.task_attempts
                .into_iter()
                .map(|record| (Action::Create, SyncPayload::TaskAttempt(record))),
        );
        operations.extend(
            self.topic_mastery
                .into_iter()
                .map(|record| (Action::Update, SyncPayload::TopicMastery(record))),
        );
        operations
    }
}

/// Coordinates debouncing, the durable queue and background draining.
///
/// Every write becomes a queued operation before anything touches the
/// network. Interactive text edits are debounced per field; completions and
/// other discrete events are queued at once. A background task started by
/// [`SyncManager::start`] drains the queue on reconnect, on a timer, and
/// after each enqueue while online.
///
/// Operations queued through one manager carry strictly increasing
/// timestamps, so two partial writes to the same record are never tied and
/// the later one always merges over the earlier.
pub struct SyncManager {
    config: SyncConfig,
    store: Arc<dyn QueueStore>,
    remote: Arc<dyn RemoteService>,
    connectivity: ConnectivityMonitor,
    processor: QueueProcessor,
    debouncer: DebounceManager<SyncPayload>,
    owner: RwLock<Option<String>>,
    drain_requested: Notify,
    /// Last timestamp handed to a queued operation.
    clock: AtomicU64,
    this: Weak<SyncManager>,
}

impl SyncManager {
    /// Creates a manager. No account is bound until [`SyncManager::initialize`].
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteService>,
        connectivity: ConnectivityMonitor,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            processor: QueueProcessor::new(Arc::clone(&store), Arc::clone(&remote), config.clone()),
            config,
            store,
            remote,
            connectivity,
            debouncer: DebounceManager::new(),
            owner: RwLock::new(None),
            drain_requested: Notify::new(),
            clock: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// Binds the manager to an account.
    ///
    /// Switching accounts discards edits still waiting in the debouncer.
    pub fn initialize(&self, owner_id: impl Into<String>) {
        let owner_id = owner_id.into();
        let mut owner = self.owner.write();
        if owner.as_deref().is_some_and(|current| current != owner_id) {
            let discarded = self.debouncer.cancel_all();
            debug!(discarded, "account switched, pending edits discarded");
        }
        info!(owner = %owner_id, "sync manager initialized");
        *owner = Some(owner_id);
    }

    /// Discards pending debounced edits and unbinds the account.
    ///
    /// Operations already queued stay queued; each carries its own owner.
    pub fn clear(&self) {
        let discarded = self.debouncer.cancel_all();
        *self.owner.write() = None;
        info!(discarded, "sync manager cleared");
    }

    /// The bound account, if any.
    pub fn owner_id(&self) -> Option<String> {
        self.owner.read().clone()
    }

    /// The connectivity monitor.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Processor statistics.
    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    fn require_owner(&self) -> SyncResult<String> {
        self.owner_id().ok_or(SyncError::NotInitialized)
    }

    /// Wall-clock millis, bumped past the previous value when the clock has
    /// not moved on.
    fn next_timestamp(&self) -> Timestamp {
        let now = now_millis();
        let (Ok(last) | Err(last)) = self
            .clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            });
        now.max(last.saturating_add(1))
    }

    /// Validates and queues one operation for the bound account.
    fn enqueue(&self, action: Action, payload: SyncPayload) -> SyncResult<SyncOperation> {
        let owner = self.require_owner()?;
        payload.validate()?;
        let operation = SyncOperation::at(
            owner,
            action,
            payload,
            self.config.default_max_retries,
            self.next_timestamp(),
        );
        self.store.add(operation.clone())?;
        debug!(
            id = %operation.id,
            domain = %operation.domain(),
            key = %operation.key(),
            "operation queued"
        );
        self.request_drain();
        Ok(operation)
    }

    fn request_drain(&self) {
        if self.connectivity.is_online() {
            self.drain_requested.notify_one();
        }
    }

    /// Callback run when a debounce slot settles.
    fn settle_callback(&self) -> Callback<SyncPayload> {
        let manager = self.this.clone();
        callback(move |payload: SyncPayload| {
            let manager = manager.clone();
            async move {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if let Err(err) = manager.enqueue(Action::Update, payload) {
                    warn!(error = %err, "settled edit could not be queued");
                }
            }
        })
    }

    /// Routes a write through the debounce slot `key`, or queues it at once
    /// when `delay` is zero.
    async fn submit(&self, key: String, delay: Duration, payload: SyncPayload) -> SyncResult<()> {
        self.require_owner()?;
        payload.validate()?;
        if delay.is_zero() {
            self.enqueue(Action::Update, payload)?;
            return Ok(());
        }
        self.debouncer.prune_idle();
        self.debouncer.register(key.clone(), delay, self.settle_callback());
        self.debouncer.execute(&key, payload).await
    }

    /// Debounced: the code written for a day.
    pub async fn sync_code(&self, day: u32, code: impl Into<String>) -> SyncResult<()> {
        let record = ProgressRecord {
            code: Some(code.into()),
            ..ProgressRecord::new(day)
        };
        self.submit(
            format!("code:{day}"),
            self.config.delays.text_field,
            SyncPayload::Progress(record),
        )
        .await
    }

    /// Debounced: the notes taken for a day.
    pub async fn sync_notes(&self, day: u32, notes: impl Into<String>) -> SyncResult<()> {
        let record = ProgressRecord {
            notes: Some(notes.into()),
            ..ProgressRecord::new(day)
        };
        self.submit(
            format!("notes:{day}"),
            self.config.delays.text_field,
            SyncPayload::Progress(record),
        )
        .await
    }

    /// Debounced: the recap answer for a day.
    pub async fn sync_recap_answer(&self, day: u32, answer: impl Into<String>) -> SyncResult<()> {
        let record = ProgressRecord {
            recap_answer: Some(answer.into()),
            ..ProgressRecord::new(day)
        };
        self.submit(
            format!("recap:{day}"),
            self.config.delays.text_field,
            SyncPayload::Progress(record),
        )
        .await
    }

    /// Debounced: profile fields.
    pub async fn sync_profile(&self, profile: ProfileRecord) -> SyncResult<()> {
        self.submit(
            "profile".to_string(),
            self.config.delays.profile,
            SyncPayload::Profile(profile),
        )
        .await
    }

    /// The tasks completed on a day.
    pub async fn sync_task_completion(&self, day: u32, completed_tasks: Vec<u32>) -> SyncResult<()> {
        let record = ProgressRecord {
            completed_tasks,
            ..ProgressRecord::new(day)
        };
        self.submit(
            format!("tasks:{day}"),
            self.config.delays.completion,
            SyncPayload::Progress(record),
        )
        .await
    }

    /// Whether a day is completed.
    pub async fn sync_day_completion(&self, day: u32, completed: bool) -> SyncResult<()> {
        let record = ProgressRecord {
            completed,
            ..ProgressRecord::new(day)
        };
        self.submit(
            format!("day:{day}"),
            self.config.delays.completion,
            SyncPayload::Progress(record),
        )
        .await
    }

    /// Newly unlocked achievements together with the stats that earned them.
    pub fn sync_achievement_unlock(
        &self,
        achievement_ids: Vec<String>,
        stats: UserStats,
    ) -> SyncResult<SyncOperation> {
        self.enqueue(
            Action::Update,
            SyncPayload::Achievement(AchievementRecord {
                unlocked_achievements: achievement_ids,
                stats,
                updated_at: 0,
            }),
        )
    }

    /// Aggregate user stats.
    pub fn sync_user_stats(&self, stats: UserStats) -> SyncResult<SyncOperation> {
        self.sync_achievement_unlock(Vec::new(), stats)
    }

    /// One submitted task attempt.
    pub fn sync_task_attempt(&self, attempt: TaskAttemptRecord) -> SyncResult<SyncOperation> {
        self.enqueue(Action::Create, SyncPayload::TaskAttempt(attempt))
    }

    /// Mastery of one topic.
    pub fn sync_topic_mastery(&self, mastery: TopicMasteryRecord) -> SyncResult<SyncOperation> {
        self.enqueue(Action::Update, SyncPayload::TopicMastery(mastery))
    }

    /// Queues every record of a local dataset, keeping each record's own
    /// `updated_at`. Returns the number of operations queued.
    ///
    /// # Errors
    ///
    /// Nothing is queued if any record fails validation.
    pub fn sync_all_data(&self, bundle: LocalDataBundle) -> SyncResult<usize> {
        let owner = self.require_owner()?;
        let operations = bundle.into_operations();
        for (_, payload) in &operations {
            payload.validate()?;
        }

        let count = operations.len();
        for (action, payload) in operations {
            let operation =
                SyncOperation::from_record(&owner, action, payload, self.config.default_max_retries);
            self.store.add(operation)?;
        }
        info!(count, "local data queued for migration");
        self.request_drain();
        Ok(count)
    }

    /// Reads a domain straight from the remote, bypassing the queue.
    pub async fn fetch_from_cloud(&self, domain: Domain) -> SyncResult<Vec<SyncPayload>> {
        let owner = self.require_owner()?;
        self.remote.fetch_all(&owner, domain).await
    }

    /// Settles every pending debounced edit now. Returns how many fired.
    pub async fn flush_all(&self) -> usize {
        self.debouncer.flush_all().await
    }

    /// Discards every pending debounced edit. Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        self.debouncer.cancel_all()
    }

    /// Returns true if edits are waiting in the debouncer or the queue.
    pub fn has_pending(&self) -> SyncResult<bool> {
        Ok(self.pending_count()? > 0)
    }

    /// Debounced edits plus queued operations.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.debouncer.pending_keys().len() + self.store.size()?)
    }

    /// Drains the queue now. Returns `None` while offline.
    pub async fn process_now(&self) -> SyncResult<Option<DrainReport>> {
        if !self.connectivity.is_online() {
            debug!("offline, drain skipped");
            return Ok(None);
        }
        self.processor.process_queue().await.map(Some)
    }

    async fn drain_in_background(&self, trigger: &'static str) {
        match self.process_now().await {
            Ok(Some(report)) => debug!(trigger, processed = report.processed, "background drain"),
            Ok(None) => {}
            Err(err) => warn!(trigger, error = %err, "background drain failed"),
        }
    }

    /// Spawns the background drain loop.
    ///
    /// The loop drains on every offline to online transition, every
    /// `process_interval`, and after each enqueue while online. It runs until
    /// [`SyncHandle::shutdown`] is called or the handle is dropped.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let manager = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut online_rx = self.connectivity.watch();

        let task = tokio::spawn(async move {
            let mut ticker = manager.config.process_interval.map(|period| {
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            info!("background sync started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *online_rx.borrow_and_update();
                        if online {
                            manager.drain_in_background("reconnect").await;
                        }
                    }
                    _ = manager.drain_requested.notified() => {
                        manager.drain_in_background("enqueue").await;
                    }
                    _ = next_tick(&mut ticker) => {
                        manager.drain_in_background("interval").await;
                    }
                }
            }
            info!("background sync stopped");
        });

        SyncHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle to the background drain loop.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "background sync task ended abnormally");
        }
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
