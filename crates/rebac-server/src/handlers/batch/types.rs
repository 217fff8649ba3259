//! Data types for batch check operations.

use rebac_domain::error::{DomainError, ErrorKind};
use rebac_domain::model::TupleKey;
use serde::{Deserialize, Serialize};

/// Default maximum number of items in one batch.
pub const MAX_BATCH_SIZE: usize = 50;

/// A single check within a batch request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCheckItem {
    /// The subject (e.g., "user:alice").
    pub user: String,
    /// The relation to check (e.g., "viewer").
    pub relation: String,
    /// The object identifier (e.g., "document:readme").
    pub object: String,
    /// Request-scoped tuples for this item only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contextual_tuples: Vec<TupleKey>,
}

impl BatchCheckItem {
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
            contextual_tuples: Vec::new(),
        }
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<TupleKey>) -> Self {
        self.contextual_tuples = tuples;
        self
    }
}

/// Request for batch permission checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCheckRequest {
    pub checks: Vec<BatchCheckItem>,
    /// Snapshot every item is evaluated at.
    #[serde(default)]
    pub consistency_token: Option<String>,
}

impl BatchCheckRequest {
    pub fn new(checks: Vec<BatchCheckItem>) -> Self {
        Self {
            checks,
            consistency_token: None,
        }
    }

    pub fn with_consistency_token(mut self, token: impl Into<String>) -> Self {
        self.consistency_token = Some(token.into());
        self
    }
}

/// Why one item could not be decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DomainError> for BatchItemError {
    fn from(err: &DomainError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of a single check within a batch.
///
/// `allowed` is false whenever `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCheckItemResult {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchItemError>,
    /// Token the item was evaluated at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_token: Option<String>,
}

impl BatchCheckItemResult {
    pub fn failed(err: &DomainError) -> Self {
        Self {
            allowed: false,
            error: Some(err.into()),
            consistency_token: None,
        }
    }
}

/// Response from a batch check operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCheckResponse {
    /// Results for each check, in the same order as the request.
    pub results: Vec<BatchCheckItemResult>,
}

/// Errors that reject a whole batch.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BatchCheckError {
    #[error("batch request cannot be empty")]
    EmptyBatch,

    #[error("batch size {size} exceeds maximum allowed {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// Result type for batch check operations.
pub type BatchCheckResult<T> = Result<T, BatchCheckError>;
