//! Journal-backed queue store.

use super::index::QueueIndex;
use super::journal::{self, JournalRecord};
use super::QueueStore;
use crate::error::SyncResult;
use learnsync_protocol::SyncOperation;
use learnsync_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info, warn};

/// A queue that survives process restarts.
///
/// Every mutation is appended to the journal as one checksummed frame and
/// synced before the in-memory index changes, so a crash either keeps or
/// loses a whole mutation. Opening the store replays the journal.
///
/// Compaction: when the queue drains to empty the journal is truncated to
/// zero. Otherwise, once the journal holds at least the compaction threshold
/// of frames and more than half of them are dead, it is atomically
/// rewritten as one `Put` per live operation.
pub struct PersistentQueueStore<B: StorageBackend> {
    inner: Mutex<Inner<B>>,
}

/// Default minimum frame count before a snapshot rewrite is considered.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 256;

struct Inner<B> {
    backend: B,
    index: QueueIndex,
    /// Frames currently in the journal, live or dead.
    frames: usize,
    compaction_threshold: usize,
}

impl PersistentQueueStore<FileBackend> {
    /// Opens (or creates) a journal file and replays it.
    ///
    /// # Errors
    ///
    /// Fails if the file is locked by another process or the journal is
    /// corrupted before its final frame.
    pub fn open(path: &Path) -> SyncResult<Self> {
        Self::with_backend(FileBackend::open_with_create_dirs(path)?)
    }
}

impl<B: StorageBackend> PersistentQueueStore<B> {
    /// Replays the journal held by `backend`.
    pub fn with_backend(mut backend: B) -> SyncResult<Self> {
        let image = backend.read_all()?;
        let replayed = journal::replay(&image)?;

        if replayed.valid_len < image.len() as u64 {
            warn!(
                valid = replayed.valid_len,
                size = image.len(),
                "discarding torn journal tail"
            );
            backend.truncate(replayed.valid_len)?;
        }

        let mut index = QueueIndex::default();
        let frames = replayed.records.len();
        for record in replayed.records {
            match record {
                JournalRecord::Put(op) => index.insert(op),
                JournalRecord::Remove(id) => {
                    index.remove(&id);
                }
                JournalRecord::Clear => index.clear(),
            }
        }
        info!(frames, pending = index.len(), "queue journal replayed");

        Ok(Self {
            inner: Mutex::new(Inner {
                backend,
                index,
                frames,
                compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            }),
        })
    }

    /// Sets the minimum journal frame count before a snapshot rewrite.
    #[must_use]
    pub fn with_compaction_threshold(self, frames: usize) -> Self {
        self.inner.lock().compaction_threshold = frames.max(1);
        self
    }

    /// Current journal size in bytes.
    pub fn journal_size(&self) -> SyncResult<u64> {
        Ok(self.inner.lock().backend.size()?)
    }

    /// Frames currently held by the journal, including dead ones.
    pub fn journal_frames(&self) -> usize {
        self.inner.lock().frames
    }
}

impl<B: StorageBackend> Inner<B> {
    /// Appends and syncs one frame; on failure the journal is cut back.
    fn write(&mut self, record: &JournalRecord) -> SyncResult<()> {
        let frame = record.encode()?;
        let before = self.backend.size()?;
        let written = self
            .backend
            .append(&frame)
            .and_then(|_| self.backend.sync());

        if let Err(err) = written {
            if let Err(cut) = self.backend.truncate(before) {
                warn!(error = %cut, "could not cut back partial journal frame");
            }
            return Err(err.into());
        }
        self.frames += 1;
        Ok(())
    }

    /// Truncates an empty queue's journal, or rewrites a mostly dead one.
    ///
    /// Failures are logged; the uncompacted journal stays valid.
    fn compact(&mut self) {
        if self.index.is_empty() {
            match self.backend.truncate(0) {
                Ok(()) => {
                    self.frames = 0;
                    debug!("queue empty, journal truncated");
                }
                Err(err) => warn!(error = %err, "journal compaction failed"),
            }
            return;
        }

        let live = self.index.len();
        if self.frames < self.compaction_threshold || self.frames <= live * 2 {
            return;
        }
        match self.snapshot() {
            Ok(bytes) => {
                debug!(dead = self.frames - live, live, bytes, "journal rewritten as snapshot");
                self.frames = live;
            }
            Err(err) => warn!(error = %err, "journal snapshot failed"),
        }
    }

    fn snapshot(&mut self) -> SyncResult<usize> {
        let mut image = Vec::new();
        for operation in self.index.ordered() {
            image.extend(JournalRecord::Put(operation).encode()?);
        }
        self.backend.replace(&image)?;
        Ok(image.len())
    }
}

impl<B: StorageBackend> QueueStore for PersistentQueueStore<B> {
    fn add(&self, operation: SyncOperation) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        inner.index.check_absent(&operation.id)?;
        inner.write(&JournalRecord::Put(operation.clone()))?;
        inner.index.insert(operation);
        Ok(())
    }

    fn get_all(&self) -> SyncResult<Vec<SyncOperation>> {
        Ok(self.inner.lock().index.ordered())
    }

    fn get(&self, id: &str) -> SyncResult<Option<SyncOperation>> {
        Ok(self.inner.lock().index.get(id).cloned())
    }

    fn update(&self, operation: SyncOperation) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        inner.index.check_present(&operation.id)?;
        inner.write(&JournalRecord::Put(operation.clone()))?;
        inner.index.insert(operation);
        inner.compact();
        Ok(())
    }

    fn remove(&self, id: &str) -> SyncResult<bool> {
        let mut inner = self.inner.lock();
        if inner.index.get(id).is_none() {
            return Ok(false);
        }
        inner.write(&JournalRecord::Remove(id.to_string()))?;
        inner.index.remove(id);
        inner.compact();
        Ok(true)
    }

    fn clear(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        inner.write(&JournalRecord::Clear)?;
        inner.index.clear();
        inner.compact();
        Ok(())
    }

    fn size(&self) -> SyncResult<usize> {
        Ok(self.inner.lock().index.len())
    }
}
