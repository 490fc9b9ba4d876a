//! # learnsync Engine
//!
//! Offline-first synchronization for learner data.
//!
//! This crate provides:
//! - A durable, ordered operation queue (in-memory or journal-backed)
//! - Debounce and throttle primitives for interactive edits
//! - Retry with exponential backoff and error classification
//! - A single-flight queue processor with conflict resolution
//! - Connectivity tracking with transition callbacks
//! - [`SyncManager`], the facade the application calls
//!
//! ## Architecture
//!
//! Writes never go to the network directly:
//! 1. An edit is validated and, for text fields, debounced
//! 2. The settled write becomes a [`SyncOperation`](learnsync_protocol::SyncOperation) in the queue
//! 3. The processor drains the queue in timestamp order, reconciling each
//!    payload with the remote record before applying it
//!
//! ## Key Invariants
//!
//! - The queue is the source of truth for unsynced writes
//! - Delivery is at-least-once; the remote must be idempotent
//! - At most one drain pass runs at a time
//! - An operation is dropped only after its attempt budget is spent or on a
//!   permanent failure

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod debounce;
mod error;
mod manager;
mod processor;
pub mod queue;
mod remote;
mod retry;

pub use config::{DelayPolicy, RetryConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, Subscription};
pub use debounce::{callback, BoxFuture, Callback, DebounceManager, Debouncer, Throttler};
pub use error::{SyncError, SyncResult};
pub use manager::{LocalDataBundle, SyncHandle, SyncManager};
pub use processor::{DrainReport, OperationState, ProcessorStats, QueueProcessor};
pub use queue::{MemoryQueueStore, PersistentQueueStore, QueueStore};
pub use remote::{MemoryRemote, RemoteService};
pub use retry::{classify_error, is_retryable_error, retry_with_backoff, ErrorClass, RetryOutcome};
