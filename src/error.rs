//! WolfTable Error Types

use thiserror::Error;

/// Result type alias for WolfTable operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a single replica adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    /// A physical row with the same key already exists
    #[error("Conflict: row {row_key} already exists")]
    Conflict { row_key: String },

    #[error("Replica unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ReplicaError {
    /// Check if this failure is a write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReplicaError::Conflict { .. })
    }
}

impl From<rusqlite::Error> for ReplicaError {
    fn from(e: rusqlite::Error) -> Self {
        ReplicaError::Storage(e.to_string())
    }
}

/// A replica failure tagged with the replica that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaFailure {
    pub replica: String,
    pub error: ReplicaError,
}

impl std::fmt::Display for ReplicaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.replica, self.error)
    }
}

/// WolfTable error types
#[derive(Error, Debug)]
pub enum Error {
    // Quorum errors
    #[error("Quorum failure: {} replica(s) failed ({})", .0.len(), join_failures(.0))]
    QuorumFailure(Vec<ReplicaFailure>),

    #[error("No quorum consensus: replicas disagree and not all of them answered")]
    NoQuorumConsensus,

    // Operation errors
    #[error("No row found for this partition key/row key combination")]
    NotFound,

    #[error("A row already exists for this partition key/row key combination")]
    AlreadyExists,

    #[error("The current ETag and the ETag provided don't match")]
    ETagMismatch,

    // Validation errors
    #[error("Invalid ETag {0:?}: expected \"*\" or a decimal version")]
    InvalidETag(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_failures(failures: &[ReplicaFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Check if this error is retryable by restarting the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::QuorumFailure(_) | Error::NoQuorumConsensus)
    }

    /// Replica failures carried by a quorum failure
    pub fn replica_failures(&self) -> &[ReplicaFailure] {
        match self {
            Error::QuorumFailure(failures) => failures,
            _ => &[],
        }
    }
}
