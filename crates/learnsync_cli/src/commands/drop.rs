//! Drop command implementation.

use super::{open_store, CliError};
use learnsync_engine::QueueStore;
use std::path::Path;
use tracing::info;

/// Removes one operation by id.
pub fn run(path: &Path, id: &str) -> Result<(), CliError> {
    let store = open_store(path)?;
    if store.remove(id)? {
        info!(id, "operation removed");
        println!("Removed {id}");
    } else {
        println!("No queued operation with id {id}");
    }
    Ok(())
}
