//! Inspect command implementation.

use super::{open_store, CliError, OutputFormat};
use learnsync_engine::QueueStore;
use learnsync_protocol::SyncOperation;
use serde::Serialize;
use std::path::Path;

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Queued operations in processing order.
    pub operations: Vec<SyncOperation>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let store = open_store(path)?;
    let result = InspectResult {
        path: path.display().to_string(),
        journal_size: store.journal_size()?,
        operations: store.get_all()?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Queue: {}", result.path);
    println!("Journal size: {} bytes", result.journal_size);
    println!("Pending operations: {}", result.operations.len());

    if result.operations.is_empty() {
        return;
    }

    println!();
    println!(
        "{:<36}  {:<13}  {:<7}  {:<24}  {:>13}  {:>7}",
        "ID", "DOMAIN", "ACTION", "KEY", "TIMESTAMP", "RETRIES"
    );
    for op in &result.operations {
        println!(
            "{:<36}  {:<13}  {:<7}  {:<24}  {:>13}  {:>3}/{:<3}",
            op.id,
            op.domain().as_str(),
            format!("{:?}", op.action).to_lowercase(),
            op.key(),
            op.timestamp,
            op.retries,
            op.max_retries
        );
    }
}
