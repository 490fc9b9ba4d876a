//! CLI command implementations.

pub mod clear;
pub mod drop;
pub mod inspect;
pub mod verify;

use learnsync_engine::{PersistentQueueStore, SyncError};
use learnsync_storage::{FileBackend, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// No journal at the given path.
    #[error("no queue journal found at {0:?}")]
    NotFound(PathBuf),

    /// Queue or journal failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing journal; commands never create one.
pub(crate) fn open_store(path: &Path) -> Result<PersistentQueueStore<FileBackend>, CliError> {
    if !path.exists() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    Ok(PersistentQueueStore::open(path)?)
}
