//! Error types for the sync engine.

use crate::retry::{classify_error, ErrorClass};
use learnsync_protocol::{ProtocolError, ValidationError};
use learnsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur inside the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote service rejected or failed a call.
    #[error("remote error: {message}")]
    Remote {
        /// Error message as reported by the service.
        message: String,
    },

    /// Journal backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding, decoding or resolution failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The journal holds a damaged record.
    #[error("journal corrupted: {0}")]
    Corrupted(String),

    /// A payload failed validation at enqueue time.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An operation with this id is already queued.
    #[error("operation {0} is already queued")]
    DuplicateOperation(String),

    /// No queued operation has this id.
    #[error("operation {0} is not queued")]
    OperationNotFound(String),

    /// No debounce slot is registered under this key.
    #[error("no debounce slot registered for {0:?}")]
    UnknownSlot(String),

    /// The sync manager has no bound account.
    #[error("sync manager is not initialized")]
    NotInitialized,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a remote error from a service message.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Remote failures are classified by message; anything the classifier
    /// does not recognise is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { message } => classify_error(message) != ErrorClass::Permanent,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
