//! Error types for the protocol crate.

use crate::operation::Domain;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or resolving operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Tried to resolve two payloads that belong to different domains.
    #[error("cannot resolve {local} payload against {remote} payload")]
    DomainMismatch {
        /// Domain of the local payload.
        local: Domain,
        /// Domain of the remote payload.
        remote: Domain,
    },

    /// A domain name that is not one of the known domains.
    #[error("unknown domain: {0}")]
    UnknownDomain(String),
}

/// A payload that failed validation at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {domain} payload: {field} {reason}")]
pub struct ValidationError {
    /// Domain of the rejected payload.
    pub domain: Domain,
    /// Offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(domain: Domain, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            domain,
            field,
            reason: reason.into(),
        }
    }
}
