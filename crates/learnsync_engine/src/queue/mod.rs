//! Durable operation queue.
//!
//! Operations are keyed by id and ordered by `(timestamp, insertion)`, so
//! operations created in the same millisecond keep their submission order.
//! Every mutation is atomic at the single-record level.

mod index;
mod journal;
mod persistent;

pub use journal::{compute_crc32, replay, JournalRecord, Replay, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use persistent::{PersistentQueueStore, DEFAULT_COMPACTION_THRESHOLD};

use crate::error::SyncResult;
use index::QueueIndex;
use learnsync_protocol::SyncOperation;
use parking_lot::RwLock;

/// Storage for pending sync operations.
///
/// # Invariants
///
/// - `get_all` is sorted by timestamp, ties in insertion order
/// - an id is present at most once
/// - a failed call leaves the prior state unchanged
pub trait QueueStore: Send + Sync {
    /// Queues a new operation.
    ///
    /// # Errors
    ///
    /// [`crate::SyncError::DuplicateOperation`] if the id is already queued.
    fn add(&self, operation: SyncOperation) -> SyncResult<()>;

    /// Returns every queued operation in processing order.
    fn get_all(&self) -> SyncResult<Vec<SyncOperation>>;

    /// Returns one operation by id.
    fn get(&self, id: &str) -> SyncResult<Option<SyncOperation>>;

    /// Replaces a queued operation (same id).
    ///
    /// # Errors
    ///
    /// [`crate::SyncError::OperationNotFound`] if the id is not queued.
    fn update(&self, operation: SyncOperation) -> SyncResult<()>;

    /// Removes an operation. Returns false if it was not queued.
    fn remove(&self, id: &str) -> SyncResult<bool>;

    /// Removes every operation.
    fn clear(&self) -> SyncResult<()>;

    /// Number of queued operations.
    fn size(&self) -> SyncResult<usize>;
}

/// A queue that lives only in memory.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    index: RwLock<QueueIndex>,
}

impl MemoryQueueStore {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn add(&self, operation: SyncOperation) -> SyncResult<()> {
        let mut index = self.index.write();
        index.check_absent(&operation.id)?;
        index.insert(operation);
        Ok(())
    }

    fn get_all(&self) -> SyncResult<Vec<SyncOperation>> {
        Ok(self.index.read().ordered())
    }

    fn get(&self, id: &str) -> SyncResult<Option<SyncOperation>> {
        Ok(self.index.read().get(id).cloned())
    }

    fn update(&self, operation: SyncOperation) -> SyncResult<()> {
        let mut index = self.index.write();
        index.check_present(&operation.id)?;
        index.insert(operation);
        Ok(())
    }

    fn remove(&self, id: &str) -> SyncResult<bool> {
        Ok(self.index.write().remove(id))
    }

    fn clear(&self) -> SyncResult<()> {
        self.index.write().clear();
        Ok(())
    }

    fn size(&self) -> SyncResult<usize> {
        Ok(self.index.read().len())
    }
}
