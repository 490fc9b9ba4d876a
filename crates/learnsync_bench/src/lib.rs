//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use learnsync_protocol::{Action, ProgressRecord, SyncOperation, SyncPayload};
use rand::Rng;

/// Random source code of the given length.
pub fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// A progress record for `day` with `tasks` random completed task indexes.
pub fn progress_record(day: u32, tasks: usize, code_len: usize) -> ProgressRecord {
    let mut rng = rand::thread_rng();
    ProgressRecord {
        completed_tasks: (0..tasks).map(|_| rng.gen_range(0..(tasks as u32 * 2).max(1))).collect(),
        code: Some(random_code(code_len)),
        ..ProgressRecord::new(day)
    }
}

/// `count` update operations with random timestamps.
pub fn generate_operations(count: usize, code_len: usize) -> Vec<SyncOperation> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            SyncOperation::at(
                "bench-user",
                Action::Update,
                SyncPayload::Progress(progress_record(i as u32 + 1, 4, code_len)),
                3,
                rng.gen_range(0..1_000_000),
            )
        })
        .collect()
}
