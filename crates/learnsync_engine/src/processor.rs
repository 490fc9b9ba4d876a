//! Queue processor: replays queued operations against the remote service.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::queue::QueueStore;
use crate::remote::RemoteService;
use crate::retry::retry_with_backoff;
use learnsync_protocol::{Action, SyncOperation, SyncPayload};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of a queued operation.
///
/// `Pending → Processing → Synced | Pending (retries incremented) | Dropped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Waiting in the queue.
    Pending,
    /// Being replayed against the remote.
    Processing,
    /// Applied remotely and removed from the queue.
    Synced,
    /// Budget spent or failed permanently; removed without being applied.
    Dropped,
}

impl OperationState {
    /// Returns true if the operation has left the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Synced | OperationState::Dropped)
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Operations looked at.
    pub processed: usize,
    /// Operations applied and removed.
    pub succeeded: usize,
    /// Operations that failed and stay queued.
    pub requeued: usize,
    /// Operations removed without being applied.
    pub dropped: usize,
    /// Operations whose payload was reconciled with a differing remote record.
    pub conflicts: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

/// Statistics accumulated across drain passes.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    /// Completed drain passes.
    pub cycles: u64,
    /// Operations applied.
    pub succeeded: u64,
    /// Operations put back after a failure.
    pub requeued: u64,
    /// Operations dropped.
    pub dropped: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Last failure message.
    pub last_error: Option<String>,
    /// End of the last drain pass.
    pub last_drain: Option<Instant>,
}

type InFlight = watch::Receiver<Option<DrainReport>>;

/// Clears the in-flight slot even if the leading pass is cancelled.
struct InFlightGuard<'a>(&'a Mutex<Option<InFlight>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

enum Role {
    Lead(watch::Sender<Option<DrainReport>>),
    Follow(InFlight),
}

/// Drains the queue in timestamp order.
///
/// At most one pass runs at a time: a caller arriving while a pass is in
/// flight waits for it and receives its report.
pub struct QueueProcessor {
    store: Arc<dyn QueueStore>,
    remote: Arc<dyn RemoteService>,
    config: SyncConfig,
    in_flight: Mutex<Option<InFlight>>,
    stats: RwLock<ProcessorStats>,
}

impl QueueProcessor {
    /// Creates a processor.
    pub fn new(store: Arc<dyn QueueStore>, remote: Arc<dyn RemoteService>, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            in_flight: Mutex::new(None),
            stats: RwLock::new(ProcessorStats::default()),
        }
    }

    /// Gets the accumulated stats.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.read().clone()
    }

    /// Returns true while a drain pass is running.
    pub fn is_processing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Runs one drain pass, or joins the pass already running.
    ///
    /// # Errors
    ///
    /// Fails only if the queue store itself fails. Remote failures are
    /// accounted per operation and reported in the [`DrainReport`].
    pub async fn process_queue(&self) -> SyncResult<DrainReport> {
        loop {
            let role = {
                let mut slot = self.in_flight.lock();
                match slot.as_ref() {
                    Some(rx) => Role::Follow(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Some(rx);
                        Role::Lead(tx)
                    }
                }
            };

            match role {
                Role::Lead(tx) => {
                    let guard = InFlightGuard(&self.in_flight);
                    let result = self.drain().await;
                    drop(guard);
                    if let Ok(report) = &result {
                        tx.send_replace(Some(report.clone()));
                    }
                    return result;
                }
                Role::Follow(mut rx) => {
                    debug!("drain already in flight, joining it");
                    let shared = rx
                        .wait_for(|report| report.is_some())
                        .await
                        .ok()
                        .and_then(|report| (*report).clone());
                    if let Some(report) = shared {
                        return Ok(report);
                    }
                    // The leading pass failed or was cancelled; run our own.
                }
            }
        }
    }

    async fn drain(&self) -> SyncResult<DrainReport> {
        let start = Instant::now();
        let mut report = DrainReport::default();

        let mut queue = self.store.get_all()?;
        if let Some(limit) = self.config.batch_limit {
            queue.truncate(limit);
        }

        for operation in queue {
            report.processed += 1;
            let (state, conflict) = self.process_one(operation).await?;
            if conflict {
                report.conflicts += 1;
            }
            match state {
                OperationState::Synced => report.succeeded += 1,
                OperationState::Dropped => report.dropped += 1,
                OperationState::Pending | OperationState::Processing => report.requeued += 1,
            }
        }
        report.duration = start.elapsed();

        {
            let mut stats = self.stats.write();
            stats.cycles += 1;
            stats.succeeded += report.succeeded as u64;
            stats.requeued += report.requeued as u64;
            stats.dropped += report.dropped as u64;
            stats.conflicts_resolved += report.conflicts as u64;
            stats.last_drain = Some(Instant::now());
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                succeeded = report.succeeded,
                requeued = report.requeued,
                dropped = report.dropped,
                conflicts = report.conflicts,
                duration_ms = report.duration.as_millis() as u64,
                "drain pass finished"
            );
        }
        Ok(report)
    }

    /// Replays one operation and settles it in the store.
    async fn process_one(&self, operation: SyncOperation) -> SyncResult<(OperationState, bool)> {
        debug!(
            id = %operation.id,
            domain = %operation.domain(),
            key = %operation.key(),
            retries = operation.retries,
            state = ?OperationState::Processing,
            "replaying operation"
        );

        let (result, attempts, conflict) = match self.prepare(&operation).await {
            Ok((payload, conflict)) => {
                // The operation's own budget replaces the configured retry count.
                let remaining = operation.remaining_retries().max(1);
                let retry = self.config.retry.clone().with_max_retries(remaining - 1);
                let outcome = retry_with_backoff(&retry, SyncError::is_retryable, |_| {
                    self.execute(&operation, &payload)
                })
                .await;
                (outcome.result, outcome.attempts, conflict)
            }
            Err(err) => (Err(err), 1, false),
        };

        let err = match result {
            Ok(()) => {
                self.store.remove(&operation.id)?;
                debug!(id = %operation.id, attempts, state = ?OperationState::Synced, "operation applied");
                return Ok((OperationState::Synced, conflict));
            }
            Err(err) => err,
        };

        self.stats.write().last_error = Some(err.to_string());
        let mut failed = operation;
        failed.record_failures(attempts);

        if !err.is_retryable() || failed.is_exhausted() {
            self.store.remove(&failed.id)?;
            error!(
                id = %failed.id,
                domain = %failed.domain(),
                key = %failed.key(),
                retries = failed.retries,
                error = %err,
                "dropping operation"
            );
            return Ok((OperationState::Dropped, conflict));
        }

        warn!(
            id = %failed.id,
            retries = failed.retries,
            max_retries = failed.max_retries,
            error = %err,
            "operation failed, requeued"
        );
        self.store.update(failed)?;
        Ok((OperationState::Pending, conflict))
    }

    /// Reconciles the local payload with the remote record.
    async fn prepare(&self, operation: &SyncOperation) -> SyncResult<(SyncPayload, bool)> {
        if operation.action == Action::Delete {
            return Ok((operation.payload.clone(), false));
        }

        let domain = operation.domain();
        let remote = self
            .remote
            .fetch_one(&operation.owner_id, domain, &operation.key())
            .await?;
        let resolution = operation
            .payload
            .resolve(remote.as_ref(), self.config.strategy_for(domain))?;
        if resolution.had_conflict {
            debug!(id = %operation.id, strategy = ?resolution.strategy, "conflict resolved");
        }
        Ok((resolution.resolved, resolution.had_conflict))
    }

    async fn execute(&self, operation: &SyncOperation, payload: &SyncPayload) -> SyncResult<()> {
        match operation.action {
            Action::Delete => {
                self.remote
                    .delete(&operation.owner_id, operation.domain(), &operation.key())
                    .await
            }
            Action::Create | Action::Update => self.remote.upsert(&operation.owner_id, payload).await,
        }
    }
}
