//! TupleStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Maximum serialized size of a condition context.
pub const MAX_CONDITION_CONTEXT_SIZE: usize = 64 * 1024;

/// Maximum length of any identifier field.
pub const MAX_FIELD_LENGTH: usize = 256;

/// A relationship fact `object_type:object_id#relation@user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_type: String,
    pub user_id: String,
    pub user_relation: Option<String>,
    pub condition_name: Option<String>,
    pub condition_context: Option<serde_json::Value>,
}

impl StoredTuple {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        user_type: impl Into<String>,
        user_id: impl Into<String>,
        user_relation: Option<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            user_type: user_type.into(),
            user_id: user_id.into(),
            user_relation,
            condition_name: None,
            condition_context: None,
        }
    }

    pub fn with_condition(
        mut self,
        condition_name: impl Into<String>,
        condition_context: Option<serde_json::Value>,
    ) -> Self {
        self.condition_name = Some(condition_name.into());
        self.condition_context = condition_context;
        self
    }

    /// The key under which at most one live tuple may exist.
    pub fn identity(&self) -> TupleIdentity {
        TupleIdentity {
            object_type: self.object_type.clone(),
            object_id: self.object_id.clone(),
            relation: self.relation.clone(),
            user_type: self.user_type.clone(),
            user_id: self.user_id.clone(),
            user_relation: self.user_relation.clone(),
            condition_name: self.condition_name.clone(),
        }
    }

    /// The subject in wire form: `type:id` or `type:id#relation`.
    pub fn user(&self) -> String {
        match &self.user_relation {
            Some(relation) => format!("{}:{}#{}", self.user_type, self.user_id, relation),
            None => format!("{}:{}", self.user_type, self.user_id),
        }
    }
}

/// Identity key of a tuple. The condition context is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleIdentity {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_type: String,
    pub user_id: String,
    pub user_relation: Option<String>,
    pub condition_name: Option<String>,
}

/// A persisted tuple with its transaction stamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleRecord {
    pub tuple: StoredTuple,
    pub created_txid: u64,
    pub deleted_txid: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl TupleRecord {
    /// Created at or before `snapshot` and not deleted at or before it.
    pub fn is_visible_at(&self, snapshot: u64) -> bool {
        self.created_txid <= snapshot && self.deleted_txid.map_or(true, |d| d > snapshot)
    }

    pub fn is_live(&self) -> bool {
        self.deleted_txid.is_none()
    }
}

/// Filter for reading tuples. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    /// `type:id` or `type:id#relation`.
    pub user: Option<String>,
    pub condition_name: Option<String>,
}

/// Result of a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Transaction id stamped on every change in the write.
    pub txid: u64,
    /// Tuples newly created (duplicates of live tuples are not counted).
    pub written: usize,
    /// Live tuples tombstoned (deletes of absent tuples are not counted).
    pub deleted: usize,
}

/// Tuple storage with transaction-id snapshots.
///
/// Every committed write advances the watermark by exactly one. Reads name
/// the snapshot they observe; a snapshot must not be ahead of the
/// watermark nor behind the compaction horizon.
#[async_trait]
pub trait TupleStore: Send + Sync + 'static {
    /// Applies deletes then writes in one transaction.
    ///
    /// Writing a tuple that is already live is a no-op, as is deleting a
    /// tuple that is not live. Deletion is a tombstone.
    async fn write(
        &self,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<WriteOutcome>;

    /// Tuples on `(object, relation)` visible at `snapshot`.
    async fn read_relation(
        &self,
        object_type: &str,
        object_id: &str,
        relation: &str,
        snapshot: u64,
    ) -> StorageResult<Vec<StoredTuple>>;

    /// Tuples whose subject is `user_type:user_id` (with or without a
    /// userset relation) visible at `snapshot`.
    async fn read_by_user(
        &self,
        user_type: &str,
        user_id: &str,
        snapshot: u64,
    ) -> StorageResult<Vec<StoredTuple>>;

    /// Tuples matching `filter` visible at `snapshot`, in creation order.
    async fn read_tuples(&self, filter: &TupleFilter, snapshot: u64)
        -> StorageResult<Vec<StoredTuple>>;

    /// Sorted, distinct ids of objects of `object_type` with a visible tuple.
    async fn list_object_ids(&self, object_type: &str, snapshot: u64)
        -> StorageResult<Vec<String>>;

    /// Latest committed transaction id.
    async fn watermark(&self) -> StorageResult<u64>;

    /// Physically removes tombstones deleted at or before `horizon`.
    /// Returns the number of records removed.
    async fn compact(&self, horizon: u64) -> StorageResult<usize>;
}

/// Validates identifier fields and condition context size.
pub fn validate_tuple(tuple: &StoredTuple) -> StorageResult<()> {
    let fields = [
        ("object_type", tuple.object_type.as_str(), ":#"),
        ("object_id", tuple.object_id.as_str(), ":#"),
        ("relation", tuple.relation.as_str(), ":#@"),
        ("user_type", tuple.user_type.as_str(), ":#"),
        ("user_id", tuple.user_id.as_str(), ":#"),
    ];
    for (name, value, forbidden) in fields {
        validate_field(name, value, forbidden)?;
    }
    if tuple.object_id == "*" {
        return Err(StorageError::InvalidInput {
            message: "object_id cannot be a wildcard".to_string(),
        });
    }
    if let Some(relation) = &tuple.user_relation {
        validate_field("user_relation", relation, ":#@")?;
    }
    if let Some(condition) = &tuple.condition_name {
        validate_field("condition_name", condition, ":#@")?;
    }

    if let Some(context) = &tuple.condition_context {
        let json = serde_json::to_string(context).map_err(|e| StorageError::SerializationError {
            message: format!("failed to serialize condition_context: {e}"),
        })?;
        if json.len() > MAX_CONDITION_CONTEXT_SIZE {
            return Err(StorageError::InvalidInput {
                message: format!(
                    "condition_context exceeds maximum size of {MAX_CONDITION_CONTEXT_SIZE} bytes (actual: {} bytes)",
                    json.len()
                ),
            });
        }
    }
    Ok(())
}

fn validate_field(name: &str, value: &str, forbidden: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::InvalidInput {
            message: format!("{name} cannot be empty"),
        });
    }
    if value.len() > MAX_FIELD_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!("{name} exceeds {MAX_FIELD_LENGTH} characters"),
        });
    }
    if value.contains(|c: char| forbidden.contains(c) || c.is_whitespace()) {
        return Err(StorageError::InvalidInput {
            message: format!("{name} '{value}' contains a reserved character"),
        });
    }
    Ok(())
}

/// Parses a user filter into `(type, id, relation)`.
pub fn parse_user_filter(user: &str) -> StorageResult<(String, String, Option<String>)> {
    let invalid = || StorageError::InvalidFilter {
        message: format!("user filter '{user}' must be 'type:id' or 'type:id#relation'"),
    };
    let (subject, relation) = match user.split_once('#') {
        Some((subject, relation)) if !relation.is_empty() => (subject, Some(relation.to_string())),
        Some(_) => return Err(invalid()),
        None => (user, None),
    };
    match subject.split_once(':') {
        Some((user_type, user_id)) if !user_type.is_empty() && !user_id.is_empty() => {
            Ok((user_type.to_string(), user_id.to_string(), relation))
        }
        _ => Err(invalid()),
    }
}
