//! Read seams consumed by the resolver.
//!
//! The resolver never writes. Every tuple read names the snapshot
//! (transaction id) it must observe: a tuple is visible when it was created
//! at or before the snapshot and not deleted at or before it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{AuthorizationModel, Subject, TypedId};

use super::types::{ReverseTupleRef, StoredTupleRef};

/// Narrows a direct-tuple lookup by subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectFilter {
    /// Exactly this subject (a concrete user, userset or typed wildcard).
    Exact(Subject),
    /// Only userset subjects (`type:id#relation`).
    Usersets,
}

impl SubjectFilter {
    pub fn matches(&self, subject: &Subject) -> bool {
        match self {
            SubjectFilter::Exact(expected) => expected == subject,
            SubjectFilter::Usersets => matches!(subject, Subject::Userset(_)),
        }
    }
}

/// Tuple store read operations needed by the resolver.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Live tuples on `(object, relation)`, optionally narrowed by subject.
    async fn find_direct(
        &self,
        object: &TypedId,
        relation: &str,
        filter: Option<&SubjectFilter>,
        snapshot: u64,
    ) -> DomainResult<Vec<StoredTupleRef>>;

    /// Subjects of the tupleset relation on `object`.
    ///
    /// The resolver follows only concrete-object subjects; anything else
    /// returned here is ignored.
    async fn find_tupleset_targets(
        &self,
        object: &TypedId,
        tupleset: &str,
        snapshot: u64,
    ) -> DomainResult<Vec<StoredTupleRef>> {
        self.find_direct(object, tupleset, None, snapshot).await
    }

    /// Reverse lookup: live tuples whose subject has this type and id,
    /// with or without a userset relation.
    async fn find_by_user(
        &self,
        user_type: &str,
        user_id: &str,
        snapshot: u64,
    ) -> DomainResult<Vec<ReverseTupleRef>>;

    /// Ids of every object of `object_type` holding at least one live tuple.
    async fn list_objects_by_type(
        &self,
        object_type: &str,
        snapshot: u64,
    ) -> DomainResult<Vec<String>>;

    /// Latest committed transaction id.
    async fn current_txid(&self) -> DomainResult<u64>;
}

/// Model consumption points.
#[async_trait]
pub trait ModelReader: Send + Sync {
    /// The currently active model version.
    async fn get_active_model(&self) -> DomainResult<Arc<AuthorizationModel>>;

    /// A specific published version.
    async fn get_model(&self, version_id: u64) -> DomainResult<Arc<AuthorizationModel>>;
}
