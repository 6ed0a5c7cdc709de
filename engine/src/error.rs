//! Error types for the Tillsync engine.

use crate::{RecordId, TableName};
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Local mutation errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("record already exists: {0}")]
    RecordAlreadyExists(RecordId),

    #[error("operation on deleted record: {0}")]
    RecordDeleted(RecordId),

    // Conflict resolution errors
    #[error("no open conflict for record: {0}")]
    ConflictNotFound(RecordId),

    #[error("record id matches conflicts in several tables: {0}")]
    AmbiguousConflict(RecordId),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot schema version mismatch: expected {expected}, got {actual}")]
    SnapshotVersionMismatch { expected: u32, actual: u32 },

    /// The local entity store failed; fatal for the operation at hand.
    #[error("local storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether this error comes from payload or table validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::TableNotFound(_)
                | Error::InvalidPayload(_)
                | Error::MissingRequiredField(_)
                | Error::TypeMismatch { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
