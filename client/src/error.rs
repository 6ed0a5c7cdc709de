//! Error taxonomy of the device agent.
//!
//! Only transport failures are retried. Everything the server decided about
//! a change (stale, rejected) is settled by the engine and shows up as a
//! conflict case, never as an error of the cycle.

use tillsync_engine::{ConflictCase, ConflictReason, Error as EngineError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network trouble or a server that could not answer; retried with backoff
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// A change was based on an outdated server version
    #[error("stale version for {table}/{record_id}")]
    StaleVersion { table: String, record_id: String },

    /// The server refused a change; retrying will not help
    #[error("change rejected for {table}/{record_id}: {reason}")]
    ValidationRejection {
        table: String,
        record_id: String,
        reason: String,
    },

    /// A change ran out of delivery attempts
    #[error("sync timed out for {table}/{record_id}")]
    SyncTimeout { table: String, record_id: String },

    /// The local store failed; fatal for the operation
    #[error("local storage error: {0}")]
    LocalStorage(String),

    #[error("sync cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    /// The server refused the request itself, e.g. a bad token or an
    /// oversized batch; retrying without a configuration change will not help
    #[error("server refused the request with status {status}: {message}")]
    Refused { status: u16, message: String },

    /// Engine error that is not a storage failure, e.g. an invalid edit
    #[error(transparent)]
    Engine(EngineError),
}

impl SyncError {
    /// Whether the failed step may succeed when simply retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// The error a conflict case stands for.
    pub fn for_case(case: &ConflictCase) -> Self {
        let table = case.table.clone();
        let record_id = case.record_id.clone();
        match &case.reason {
            ConflictReason::Tie => SyncError::StaleVersion { table, record_id },
            ConflictReason::Rejected { reason } => SyncError::ValidationRejection {
                table,
                record_id,
                reason: reason.clone(),
            },
            ConflictReason::SyncTimeout => SyncError::SyncTimeout { table, record_id },
        }
    }
}

impl From<EngineError> for SyncError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Storage(message) => SyncError::LocalStorage(message),
            other => SyncError::Engine(other),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::LocalStorage(error.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        SyncError::TransientNetwork(error.to_string())
    }
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, SyncError>;
