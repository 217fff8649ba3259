//! Storage to domain adapter.
//!
//! Bridges a `rebac_storage::TupleStore` to the resolver's `TupleReader`
//! seam, converting stored rows to domain subjects and storage errors to
//! domain errors.

use std::sync::Arc;

use async_trait::async_trait;
use rebac_domain::error::{DomainError, DomainResult};
use rebac_domain::model::{Subject, TypedId};
use rebac_domain::resolver::{ReverseTupleRef, StoredTupleRef, SubjectFilter, TupleReader};
use rebac_storage::{StorageError, StoredTuple, TupleStore};

/// Converts a storage error into a domain error.
///
/// Snapshot errors mean the caller's consistency token cannot be served;
/// everything else is a store failure and is passed through unchanged.
pub fn map_storage_error(err: StorageError) -> DomainError {
    match err {
        StorageError::SnapshotInFuture { .. } | StorageError::SnapshotUnavailable { .. } => {
            DomainError::InvalidConsistencyToken {
                message: err.to_string(),
            }
        }
        other => DomainError::Storage {
            message: other.to_string(),
        },
    }
}

fn subject_of(tuple: &StoredTuple) -> Subject {
    Subject::from_parts(
        &tuple.user_type,
        &tuple.user_id,
        tuple.user_relation.as_deref(),
    )
}

fn to_tuple_ref(tuple: StoredTuple) -> StoredTupleRef {
    let subject = subject_of(&tuple);
    StoredTupleRef {
        subject,
        condition_name: tuple.condition_name,
        condition_context: tuple.condition_context,
    }
}

/// Adapter implementing `TupleReader` over any `TupleStore`.
pub struct StoreTupleReader<S: ?Sized> {
    store: Arc<S>,
}

impl<S: TupleStore + ?Sized> StoreTupleReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: TupleStore + ?Sized> TupleReader for StoreTupleReader<S> {
    async fn find_direct(
        &self,
        object: &TypedId,
        relation: &str,
        filter: Option<&SubjectFilter>,
        snapshot: u64,
    ) -> DomainResult<Vec<StoredTupleRef>> {
        let tuples = self
            .store
            .read_relation(&object.object_type, &object.object_id, relation, snapshot)
            .await
            .map_err(map_storage_error)?;
        Ok(tuples
            .into_iter()
            .map(to_tuple_ref)
            .filter(|t| filter.map_or(true, |f| f.matches(&t.subject)))
            .collect())
    }

    async fn find_by_user(
        &self,
        user_type: &str,
        user_id: &str,
        snapshot: u64,
    ) -> DomainResult<Vec<ReverseTupleRef>> {
        let tuples = self
            .store
            .read_by_user(user_type, user_id, snapshot)
            .await
            .map_err(map_storage_error)?;
        Ok(tuples
            .into_iter()
            .map(|t| ReverseTupleRef {
                object: TypedId::new(t.object_type, t.object_id),
                relation: t.relation,
                user_relation: t.user_relation,
                condition_name: t.condition_name,
            })
            .collect())
    }

    async fn list_objects_by_type(
        &self,
        object_type: &str,
        snapshot: u64,
    ) -> DomainResult<Vec<String>> {
        self.store
            .list_object_ids(object_type, snapshot)
            .await
            .map_err(map_storage_error)
    }

    async fn current_txid(&self) -> DomainResult<u64> {
        self.store.watermark().await.map_err(map_storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebac_storage::MemoryTupleStore;

    #[tokio::test]
    async fn test_find_direct_converts_subjects_and_filters() {
        let store = MemoryTupleStore::new_shared();
        let txid = store
            .write(
                vec![
                    StoredTuple::new("document", "1", "viewer", "user", "alice", None),
                    StoredTuple::new("document", "1", "viewer", "user", "*", None),
                    StoredTuple::new("document", "1", "viewer", "group", "eng", Some("member".into())),
                ],
                vec![],
            )
            .await
            .unwrap()
            .txid;
        let reader = StoreTupleReader::new(store);
        let object = TypedId::new("document", "1");

        let all = reader.find_direct(&object, "viewer", None, txid).await.unwrap();
        let subjects: Vec<String> = all.iter().map(|t| t.subject.to_string()).collect();
        assert_eq!(subjects, vec!["user:alice", "user:*", "group:eng#member"]);
        assert!(matches!(all[1].subject, Subject::Wildcard { .. }));

        let usersets = reader
            .find_direct(&object, "viewer", Some(&SubjectFilter::Usersets), txid)
            .await
            .unwrap();
        assert_eq!(usersets.len(), 1);

        let alice = SubjectFilter::Exact(Subject::parse("user:alice").unwrap());
        let exact = reader
            .find_direct(&object, "viewer", Some(&alice), txid)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_errors_become_token_errors() {
        let reader = StoreTupleReader::new(MemoryTupleStore::new_shared());
        let err = reader
            .find_by_user("user", "alice", 42)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidConsistencyToken { .. }));

        let err = map_storage_error(StorageError::InvalidInput {
            message: "bad".to_string(),
        });
        assert!(matches!(err, DomainError::Storage { .. }));
    }
}
