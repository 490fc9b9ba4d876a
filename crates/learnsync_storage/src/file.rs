//! File-based journal backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in a single file.
///
/// The file is held under an exclusive advisory lock for the lifetime of
/// the backend, so two processes can never append to the same queue.
/// The lock is released when the backend is dropped.
///
/// # Durability
///
/// `append` only hands bytes to the OS; `sync` calls `File::sync_data`.
/// The queue journal syncs after every frame.
///
/// # Example
///
/// ```no_run
/// use learnsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("queue.journal")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the journal file at `path` and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the file,
    /// or an I/O error if it cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: self.size,
            });
        }

        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.size = new_size;
        Ok(())
    }

    /// Writes `data` to a sibling `.compact` file, locks and syncs it, then
    /// renames it over the journal. A crash leaves either file intact.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp_path = self.path.with_extension("compact");
        let mut temp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        if temp.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(temp_path));
        }
        temp.write_all(data)?;
        temp.sync_all()?;

        std::fs::rename(&temp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        *self.file.get_mut() = temp;
        self.size = data.len() as u64;
        Ok(())
    }
}
