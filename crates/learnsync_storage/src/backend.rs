//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store holding the operation journal.
///
/// # Invariants
///
/// - `append` returns the offset at which the bytes landed
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `sync` returns, every appended byte survives a process restart
/// - `truncate` never grows the store
/// - `replace` either keeps the old contents or installs all of `data`
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not
    /// fully inside the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size`.
    ///
    /// Used to cut a torn tail after a crash and to compact the journal
    /// once the queue is empty.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically swaps the whole store for `data` and makes it durable.
    ///
    /// Used to rewrite the journal as a snapshot of the live operations.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Reads the whole store.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }
}
