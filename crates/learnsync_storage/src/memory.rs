//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A journal backend that lives only as long as the process.
///
/// Handy for unit tests and for replaying a journal image captured
/// elsewhere (see [`InMemoryBackend::with_data`]).
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`, e.g. a journal with a torn tail.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, bytes: &[u8]) -> StorageResult<()> {
        *self.data.write() = bytes.to_vec();
        Ok(())
    }
}
