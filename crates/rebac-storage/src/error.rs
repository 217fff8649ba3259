//! Storage error types.

use thiserror::Error;

/// Details for a ConditionConflict error (boxed to keep StorageError small).
///
/// A live tuple with the same identity key already exists but carries a
/// different condition context. Delete it first to change the context.
#[derive(Debug, Error)]
#[error("live tuple {object_type}:{object_id}#{relation}@{user} already exists with condition '{condition_name}' and a different context")]
pub struct ConditionConflictError {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user: String,
    pub condition_name: String,
}

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A tuple or filter field is malformed.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A user filter is not `type:id` or `type:id#relation`.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    #[error("{0}")]
    ConditionConflict(#[source] Box<ConditionConflictError>),

    /// The requested snapshot predates the compaction horizon, so
    /// tombstones it depends on are gone.
    #[error("snapshot {txid} is older than the retained horizon {horizon}")]
    SnapshotUnavailable { txid: u64, horizon: u64 },

    /// The requested snapshot has not been committed yet.
    #[error("snapshot {txid} is ahead of the committed watermark {watermark}")]
    SnapshotInFuture { txid: u64, watermark: u64 },

    /// Serialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
