//! Domain error types for authorization operations.

use thiserror::Error;

/// Coarse classification of a [`DomainError`].
///
/// Callers gating access on a check must default-deny on every kind;
/// the classification only decides how the failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The referenced type, relation or model version does not exist.
    NotFound,
    /// A traversal bound (depth) was exceeded.
    ResourceGuard,
    /// A cyclic grant prevented a crisp answer.
    Integrity,
    /// The tuple or model store failed.
    Store,
    /// The caller's deadline elapsed.
    Timeout,
    /// The request itself is malformed.
    InvalidInput,
}

/// Domain-specific errors for authorization operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Error validating authorization model.
    #[error("model validation error: {message}")]
    ModelValidation { message: String },

    /// Depth limit exceeded during graph traversal.
    #[error("depth limit exceeded (max: {max_depth})")]
    DepthLimitExceeded { max_depth: u32 },

    /// Timeout during evaluation.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Cycle detected in relation graph.
    #[error("cycle detected in relation graph: {path}")]
    CycleDetected { path: String },

    /// Invalid user format.
    #[error("invalid user format: {value}")]
    InvalidUserFormat { value: String },

    /// Invalid object format.
    #[error("invalid object format: {value}")]
    InvalidObjectFormat { value: String },

    /// Invalid relation format.
    #[error("invalid relation format: {value}")]
    InvalidRelationFormat { value: String },

    /// Type not found in authorization model.
    #[error("type not found: {type_name}")]
    TypeNotFound { type_name: String },

    /// Relation not found on type.
    #[error("relation '{relation}' not found on type '{type_name}'")]
    RelationNotFound { type_name: String, relation: String },

    /// No model version has been activated yet.
    #[error("no active authorization model")]
    NoActiveModel,

    /// The requested model version does not exist.
    #[error("authorization model version not found: {version_id}")]
    ModelVersionNotFound { version_id: u64 },

    /// The consistency token could not be decoded.
    #[error("invalid consistency token: {message}")]
    InvalidConsistencyToken { message: String },

    /// The pagination token could not be decoded.
    #[error("invalid page token: {message}")]
    InvalidPageToken { message: String },

    /// Generic request validation failure.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Failure reported by the tuple or model store, passed through unchanged.
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl DomainError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::TypeNotFound { .. }
            | DomainError::RelationNotFound { .. }
            | DomainError::NoActiveModel
            | DomainError::ModelVersionNotFound { .. } => ErrorKind::NotFound,
            DomainError::DepthLimitExceeded { .. } => ErrorKind::ResourceGuard,
            DomainError::CycleDetected { .. } => ErrorKind::Integrity,
            DomainError::Storage { .. } => ErrorKind::Store,
            DomainError::Timeout { .. } => ErrorKind::Timeout,
            DomainError::ModelValidation { .. }
            | DomainError::InvalidUserFormat { .. }
            | DomainError::InvalidObjectFormat { .. }
            | DomainError::InvalidRelationFormat { .. }
            | DomainError::InvalidConsistencyToken { .. }
            | DomainError::InvalidPageToken { .. }
            | DomainError::InvalidRequest { .. } => ErrorKind::InvalidInput,
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
