//! # learnsync protocol
//!
//! Data types shared by every layer of the learnsync offline sync engine.
//!
//! This crate provides:
//! - [`SyncOperation`], the queued unit of work, and its CBOR encoding
//! - Strongly typed domain records wrapped in the [`SyncPayload`] union
//! - Conflict detection and per-domain resolution ([`resolve_conflict`],
//!   [`SyncPayload::resolve`])
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod operation;
mod records;

pub use conflict::{
    detect_conflict, merge_unique, merge_unique_by, resolve_conflict, ConflictResolution,
    ConflictStrategy, Mergeable, Versioned,
};
pub use error::{ProtocolError, ProtocolResult, ValidationError};
pub use operation::{now_millis, Action, Domain, SyncOperation, Timestamp};
pub use records::{
    AchievementRecord, ProfileRecord, ProgressRecord, SyncPayload, TaskAttemptRecord,
    TopicMasteryRecord, UserStats,
};
