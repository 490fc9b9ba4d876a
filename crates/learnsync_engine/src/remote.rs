//! Remote data service abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use learnsync_protocol::{Domain, SyncPayload};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// The backend the queue is replayed against.
///
/// This trait abstracts the hosted database, allowing for different
/// implementations (REST, Postgres, in-memory for testing, etc.).
///
/// Implementations must be idempotent: applying the same payload twice
/// leaves the same stored state, since delivery is at-least-once.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Inserts or replaces the record identified by the payload's key.
    async fn upsert(&self, owner_id: &str, payload: &SyncPayload) -> SyncResult<()>;

    /// Deletes a record. Deleting a missing record succeeds.
    async fn delete(&self, owner_id: &str, domain: Domain, key: &str) -> SyncResult<()>;

    /// Fetches one record, if it exists.
    async fn fetch_one(
        &self,
        owner_id: &str,
        domain: Domain,
        key: &str,
    ) -> SyncResult<Option<SyncPayload>>;

    /// Fetches every record of a domain for an owner.
    async fn fetch_all(&self, owner_id: &str, domain: Domain) -> SyncResult<Vec<SyncPayload>>;
}

type RecordKey = (String, Domain, String);

#[derive(Debug, Default)]
struct FailurePlan {
    /// Calls left to fail; `None` fails forever.
    remaining: Option<u32>,
    message: String,
    active: bool,
}

/// An in-memory remote service for testing.
///
/// Records are keyed by `(owner, domain, key)`. Write failures can be
/// injected with [`MemoryRemote::fail_next`] and [`MemoryRemote::fail_always`].
#[derive(Debug, Default)]
pub struct MemoryRemote {
    records: Mutex<BTreeMap<RecordKey, SyncPayload>>,
    failures: Mutex<FailurePlan>,
    fetch_failure: Mutex<Option<String>>,
    calls: Mutex<HashMap<&'static str, u64>>,
    write_attempts: AtomicU64,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record directly, bypassing failure injection.
    pub fn seed(&self, owner_id: &str, payload: SyncPayload) {
        let key = (owner_id.to_string(), payload.domain(), payload.key());
        self.records.lock().insert(key, payload);
    }

    /// Returns a stored record.
    pub fn record(&self, owner_id: &str, domain: Domain, key: &str) -> Option<SyncPayload> {
        self.records
            .lock()
            .get(&(owner_id.to_string(), domain, key.to_string()))
            .cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Makes the next `count` writes fail with `message`.
    pub fn fail_next(&self, count: u32, message: impl Into<String>) {
        *self.failures.lock() = FailurePlan {
            remaining: Some(count),
            message: message.into(),
            active: count > 0,
        };
    }

    /// Makes every write fail with `message` until [`MemoryRemote::recover`].
    pub fn fail_always(&self, message: impl Into<String>) {
        *self.failures.lock() = FailurePlan {
            remaining: None,
            message: message.into(),
            active: true,
        };
    }

    /// Makes every fetch fail with `message` until [`MemoryRemote::recover`].
    pub fn fail_fetches(&self, message: impl Into<String>) {
        *self.fetch_failure.lock() = Some(message.into());
    }

    /// Clears injected failures.
    pub fn recover(&self) {
        *self.failures.lock() = FailurePlan::default();
        *self.fetch_failure.lock() = None;
    }

    /// Upserts and deletes attempted, including failed ones.
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Number of calls made to one method (`upsert`, `delete`, `fetch_one`, `fetch_all`).
    pub fn calls(&self, method: &str) -> u64 {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    fn note(&self, method: &'static str) {
        *self.calls.lock().entry(method).or_insert(0) += 1;
    }

    fn check_write(&self) -> SyncResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let mut plan = self.failures.lock();
        if !plan.active {
            return Ok(());
        }
        if let Some(remaining) = plan.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                plan.active = false;
            }
        }
        Err(SyncError::remote(plan.message.clone()))
    }

    fn check_fetch(&self) -> SyncResult<()> {
        match self.fetch_failure.lock().as_ref() {
            Some(message) => Err(SyncError::remote(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteService for MemoryRemote {
    async fn upsert(&self, owner_id: &str, payload: &SyncPayload) -> SyncResult<()> {
        self.note("upsert");
        self.check_write()?;
        self.seed(owner_id, payload.clone());
        Ok(())
    }

    async fn delete(&self, owner_id: &str, domain: Domain, key: &str) -> SyncResult<()> {
        self.note("delete");
        self.check_write()?;
        self.records
            .lock()
            .remove(&(owner_id.to_string(), domain, key.to_string()));
        Ok(())
    }

    async fn fetch_one(
        &self,
        owner_id: &str,
        domain: Domain,
        key: &str,
    ) -> SyncResult<Option<SyncPayload>> {
        self.note("fetch_one");
        self.check_fetch()?;
        Ok(self.record(owner_id, domain, key))
    }

    async fn fetch_all(&self, owner_id: &str, domain: Domain) -> SyncResult<Vec<SyncPayload>> {
        self.note("fetch_all");
        self.check_fetch()?;
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|((owner, d, _), _)| owner == owner_id && *d == domain)
            .map(|(_, payload)| payload.clone())
            .collect())
    }
}
