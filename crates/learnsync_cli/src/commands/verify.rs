//! Verify command implementation.

use super::CliError;
use learnsync_engine::queue::{replay, JournalRecord};
use learnsync_engine::SyncError;
use learnsync_storage::{FileBackend, StorageBackend};
use std::collections::HashSet;
use std::path::Path;

/// Journal verification result.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VerifyResult {
    /// Total journal size in bytes.
    pub size: u64,
    /// Length of the readable prefix.
    pub valid_len: u64,
    /// `Put` frames.
    pub puts: usize,
    /// `Remove` frames.
    pub removes: usize,
    /// `Clear` frames.
    pub clears: usize,
    /// Operations still queued after replay.
    pub live: usize,
}

impl VerifyResult {
    /// Bytes after the readable prefix; a torn write the next open discards.
    pub fn torn_bytes(&self) -> u64 {
        self.size - self.valid_len
    }
}

/// Scans a journal image without modifying it.
pub fn scan(image: &[u8]) -> Result<VerifyResult, SyncError> {
    let replayed = replay(image)?;
    let mut result = VerifyResult {
        size: image.len() as u64,
        valid_len: replayed.valid_len,
        ..VerifyResult::default()
    };

    let mut live = HashSet::new();
    for record in replayed.records {
        match record {
            JournalRecord::Put(op) => {
                result.puts += 1;
                live.insert(op.id);
            }
            JournalRecord::Remove(id) => {
                result.removes += 1;
                live.remove(&id);
            }
            JournalRecord::Clear => {
                result.clears += 1;
                live.clear();
            }
        }
    }
    result.live = live.len();
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    if !path.exists() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }

    println!("Verifying queue journal at {:?}", path);
    let backend = FileBackend::open(path)?;
    let image = backend.read_all()?;

    match scan(&image) {
        Ok(result) => {
            println!("  Size: {} bytes", result.size);
            println!(
                "  Frames: {} put, {} remove, {} clear",
                result.puts, result.removes, result.clears
            );
            println!("  Pending operations: {}", result.live);
            if result.torn_bytes() > 0 {
                println!(
                    "  Torn tail: {} bytes (discarded on next open)",
                    result.torn_bytes()
                );
            }
            println!("✓ Journal is readable");
            Ok(())
        }
        Err(err) => {
            println!("✗ {err}");
            Err(err.into())
        }
    }
}
