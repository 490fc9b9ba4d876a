//! Clear command implementation.

use super::{open_store, CliError};
use learnsync_engine::QueueStore;
use std::path::Path;
use tracing::info;

/// Removes every queued operation.
pub fn run(path: &Path) -> Result<(), CliError> {
    let store = open_store(path)?;
    let count = store.size()?;
    store.clear()?;
    info!(count, "queue cleared");
    println!("Removed {count} operation(s)");
    Ok(())
}
