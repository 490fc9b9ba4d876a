//! Sync operations.

use crate::conflict::ConflictStrategy;
use crate::error::{ProtocolError, ProtocolResult};
use crate::records::SyncPayload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as reported by the local clock.
pub type Timestamp = u64;

/// Returns the current wall-clock time as a [`Timestamp`].
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// The kind of record an operation touches.
///
/// The domain selects both the remote executor and the conflict strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Per-day course progress.
    Progress,
    /// Unlocked achievements and user stats.
    Achievement,
    /// User profile.
    Profile,
    /// A single graded attempt at a task.
    TaskAttempt,
    /// Per-topic mastery score.
    TopicMastery,
}

impl Domain {
    /// All domains, in declaration order.
    pub const ALL: [Domain; 5] = [
        Domain::Progress,
        Domain::Achievement,
        Domain::Profile,
        Domain::TaskAttempt,
        Domain::TopicMastery,
    ];

    /// Returns the stable snake_case name of the domain.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Progress => "progress",
            Domain::Achievement => "achievement",
            Domain::Profile => "profile",
            Domain::TaskAttempt => "task_attempt",
            Domain::TopicMastery => "topic_mastery",
        }
    }

    /// The strategy used when both sides of a record changed.
    ///
    /// Progress, achievements and topic mastery accumulate and are merged;
    /// profiles and task attempts are user-authored and last write wins.
    pub fn default_strategy(&self) -> ConflictStrategy {
        match self {
            Domain::Progress | Domain::Achievement | Domain::TopicMastery => {
                ConflictStrategy::Merge
            }
            Domain::Profile | Domain::TaskAttempt => ConflictStrategy::LastWriteWins,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownDomain(s.to_string()))
    }
}

/// What the operation does to the remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Record did not exist locally before.
    Create,
    /// Record changed.
    Update,
    /// Record was removed.
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

/// A queued local mutation destined for the remote service.
///
/// # Fields
///
/// - `id`: UUID v4 assigned at creation, unique within the queue
/// - `payload`: the typed record; the operation's domain is derived from it
/// - `timestamp`: creation time, the queue's ordering key and the default
///   conflict clock
/// - `retries` / `max_retries`: failed attempts so far and the budget,
///   `retries <= max_retries` always holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique operation ID.
    pub id: String,
    /// Create, update or delete.
    pub action: Action,
    /// Typed record payload.
    pub payload: SyncPayload,
    /// Creation time in milliseconds.
    pub timestamp: Timestamp,
    /// Failed attempts so far.
    pub retries: u32,
    /// Attempt budget.
    pub max_retries: u32,
    /// Account the operation belongs to.
    pub owner_id: String,
}

impl SyncOperation {
    /// Creates an operation stamped with the current time.
    ///
    /// The payload's `updated_at` is set to the same instant so the record
    /// and the operation share one clock.
    pub fn new(
        owner_id: impl Into<String>,
        action: Action,
        payload: SyncPayload,
        max_retries: u32,
    ) -> Self {
        Self::at(owner_id, action, payload, max_retries, now_millis())
    }

    /// Creates an operation that keeps the payload's own `updated_at`.
    ///
    /// Used when importing records that were edited at some earlier time,
    /// so they do not shadow newer remote data during conflict resolution.
    pub fn from_record(
        owner_id: impl Into<String>,
        action: Action,
        payload: SyncPayload,
        max_retries: u32,
    ) -> Self {
        let timestamp = payload.timestamp();
        Self::at(owner_id, action, payload, max_retries, timestamp)
    }

    /// Creates an operation at an explicit timestamp.
    pub fn at(
        owner_id: impl Into<String>,
        action: Action,
        payload: SyncPayload,
        max_retries: u32,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            payload: payload.with_timestamp(timestamp),
            timestamp,
            retries: 0,
            max_retries,
            owner_id: owner_id.into(),
        }
    }

    /// Domain of the payload.
    pub fn domain(&self) -> Domain {
        self.payload.domain()
    }

    /// Business key of the record this operation targets.
    pub fn key(&self) -> String {
        self.payload.key()
    }

    /// Attempts left before the operation is dropped.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retries)
    }

    /// Records `attempts` failed attempts, never exceeding `max_retries`.
    pub fn record_failures(&mut self, attempts: u32) {
        self.retries = self.retries.saturating_add(attempts).min(self.max_retries);
    }

    /// Returns true once the attempt budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::Codec(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Codec(e.to_string()))
    }
}
