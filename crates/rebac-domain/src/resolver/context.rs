//! Per-call evaluation state.
//!
//! Nothing in here outlives a single check, list or expand call, and none
//! of it is shared between concurrent calls.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::model::{AuthorizationModel, Subject, TypedId};

use super::traits::SubjectFilter;
use super::types::{ReverseTupleRef, StoredTupleRef};

/// Position in the traversal: depth and the relations on the current path.
#[derive(Debug, Clone)]
pub(crate) struct TraversalContext {
    /// Current traversal depth.
    pub(crate) depth: u32,
    /// Visit keys on the current path.
    /// Wrapped in Arc for cheap cloning when not mutating.
    pub(crate) visited: Arc<HashSet<String>>,
}

impl TraversalContext {
    pub(crate) fn root() -> Self {
        Self {
            depth: 0,
            visited: Arc::new(HashSet::new()),
        }
    }

    /// One relation hop further from the root.
    pub(crate) fn deeper(&self) -> Self {
        Self {
            depth: self.depth + 1,
            visited: Arc::clone(&self.visited),
        }
    }

    /// Records a visit key on the path (copy-on-write).
    pub(crate) fn enter(&self, key: &str) -> Self {
        let mut visited = (*self.visited).clone();
        visited.insert(key.to_string());
        Self {
            depth: self.depth,
            visited: Arc::new(visited),
        }
    }

    pub(crate) fn is_on_path(&self, key: &str) -> bool {
        self.visited.contains(key)
    }
}

/// A request-scoped tuple, parsed once per call.
#[derive(Debug, Clone)]
pub(crate) struct ContextualTuple {
    pub(crate) object: TypedId,
    pub(crate) relation: String,
    pub(crate) tuple: StoredTupleRef,
}

/// State shared by every step of one call.
pub(crate) struct CallContext {
    /// Model snapshot the call evaluates against.
    pub(crate) model: Arc<AuthorizationModel>,
    /// Tuple snapshot (transaction id) every read observes.
    pub(crate) snapshot: u64,
    pub(crate) contextual: Vec<ContextualTuple>,
    pub(crate) trace: bool,
    /// Decisions for `(user, relation, object)` computed without cutting a cycle.
    pub(crate) memo: DashMap<String, bool>,
    /// `object#relation` nodes an expand call has already produced.
    pub(crate) expanded: DashSet<String>,
    deadline: Instant,
    timeout: Duration,
}

impl CallContext {
    pub(crate) fn new(
        model: Arc<AuthorizationModel>,
        snapshot: u64,
        contextual: Vec<ContextualTuple>,
        trace: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            snapshot,
            contextual,
            trace,
            memo: DashMap::new(),
            expanded: DashSet::new(),
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Fails once the caller's deadline has passed.
    pub(crate) fn check_deadline(&self) -> DomainResult<()> {
        if Instant::now() >= self.deadline {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    pub(crate) fn timeout_error(&self) -> DomainError {
        DomainError::Timeout {
            duration_ms: self.timeout.as_millis() as u64,
        }
    }

    /// Contextual tuples on `(object, relation)` passing `filter`.
    pub(crate) fn contextual_direct(
        &self,
        object: &TypedId,
        relation: &str,
        filter: Option<&SubjectFilter>,
    ) -> impl Iterator<Item = StoredTupleRef> + '_ {
        let object = object.clone();
        let relation = relation.to_string();
        let filter = filter.cloned();
        self.contextual
            .iter()
            .filter(move |ct| {
                ct.object == object
                    && ct.relation == relation
                    && filter.as_ref().map_or(true, |f| f.matches(&ct.tuple.subject))
            })
            .map(|ct| ct.tuple.clone())
    }

    /// Contextual tuples whose subject has this type and id.
    pub(crate) fn contextual_by_user(&self, user_type: &str, user_id: &str) -> Vec<ReverseTupleRef> {
        self.contextual
            .iter()
            .filter(|ct| subject_has_id(&ct.tuple.subject, user_type, user_id))
            .map(|ct| ReverseTupleRef {
                object: ct.object.clone(),
                relation: ct.relation.clone(),
                user_relation: ct.tuple.subject.user_relation().map(str::to_string),
                condition_name: ct.tuple.condition_name.clone(),
            })
            .collect()
    }

    /// Ids of objects of `object_type` named by contextual tuples.
    pub(crate) fn contextual_object_ids<'a>(
        &'a self,
        object_type: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.contextual
            .iter()
            .filter(move |ct| ct.object.object_type == object_type)
            .map(|ct| ct.object.object_id.as_str())
    }
}

fn subject_has_id(subject: &Subject, user_type: &str, user_id: &str) -> bool {
    match subject {
        Subject::Object(id) => id.object_type == user_type && id.object_id == user_id,
        Subject::Userset(us) => us.object.object_type == user_type && us.object.object_id == user_id,
        Subject::Wildcard { user_type: t } => t == user_type && user_id == crate::model::WILDCARD_ID,
    }
}

/// Conditional tuples never grant access: condition evaluation is not
/// available here, so they are dropped.
pub(crate) fn is_usable(tuple: &StoredTupleRef, object: &TypedId, relation: &str) -> bool {
    if let Some(condition) = &tuple.condition_name {
        debug!(
            object = %object,
            relation,
            subject = %tuple.subject,
            condition = %condition,
            "ignoring conditional tuple"
        );
        return false;
    }
    true
}
