//! ListObjects and ListUsers.
//!
//! Both generate a superset of candidates from the tuple graph and then
//! confirm every candidate with a check inside the same call, so
//! intersections and exclusions stay exact. Confirmation runs with bounded
//! concurrency and shares the call's memo.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{DomainError, DomainResult};
use crate::model::{Rewrite, Subject, TypeRestriction, TypedId, WILDCARD_ID};

use super::config::ListStrategy;
use super::context::{is_usable, CallContext, TraversalContext};
use super::graph_resolver::{parse_object, validate_relation_name, BoxFuture, GraphResolver};
use super::token::{paginate, ConsistencyToken};
use super::traits::{ModelReader, TupleReader};
use super::types::{
    ListObjectsRequest, ListObjectsResult, ListUsersRequest, ListUsersResult, UserResult,
};

/// Candidate subjects gathered by forward expansion.
#[derive(Default)]
struct Gathered {
    subjects: BTreeSet<Subject>,
    /// `object#relation` already walked in this call.
    walked: HashSet<String>,
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Objects of `request.object_type` on which `request.user` holds
    /// `request.relation`.
    #[instrument(
        skip(self, request),
        fields(user = %request.user, relation = %request.relation, object_type = %request.object_type)
    )]
    pub async fn list_objects(&self, request: &ListObjectsRequest) -> DomainResult<ListObjectsResult> {
        let limit = request.timeout.unwrap_or(self.config.timeout);
        match timeout(limit, self.list_objects_inner(request, limit)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                duration_ms: limit.as_millis() as u64,
            }),
        }
    }

    async fn list_objects_inner(
        &self,
        request: &ListObjectsRequest,
        limit: Duration,
    ) -> DomainResult<ListObjectsResult> {
        let subject = Subject::parse(&request.user)?;
        validate_relation_name(&request.relation)?;
        if request.object_type.is_empty() || request.object_type.contains([':', '#']) {
            return Err(DomainError::InvalidRequest {
                message: format!("invalid object type '{}'", request.object_type),
            });
        }

        let call = self
            .open_call(
                request.consistency_token.as_deref(),
                &request.contextual_tuples,
                false,
                limit,
            )
            .await?;
        call.model.relation(&request.object_type, &request.relation)?;

        let (candidates, mut truncated) = self
            .object_candidates(&call, &subject, &request.object_type)
            .await?;
        debug!(candidates = candidates.len(), truncated, "confirming list_objects candidates");

        let call_ref = &call;
        let subject_ref = &subject;
        let relation = request.relation.as_str();
        let confirmed: Vec<(TypedId, DomainResult<bool>)> = stream::iter(candidates)
            .map(|object| async move {
                let decision = self
                    .check_in_call(call_ref, subject_ref, relation, &object)
                    .await;
                (object, decision)
            })
            .buffered(self.config.list.concurrency.max(1))
            .collect()
            .await;

        let mut objects = Vec::new();
        for (object, decision) in confirmed {
            match decision {
                Ok(true) => objects.push(object.to_string()),
                Ok(false) => {}
                Err(err) => {
                    absorb_candidate_error(err, &object.to_string())?;
                    truncated = true;
                }
            }
        }

        let page_size = self.config.list.page_size(request.page_size);
        let (objects, next_page_token) = paginate(
            objects,
            |o| o.clone(),
            page_size,
            request.page_token.as_deref(),
            call.model.version_id,
        )?;

        Ok(ListObjectsResult {
            objects,
            next_page_token,
            truncated,
            consistency_token: ConsistencyToken::new(call.snapshot, call.model.version_id)
                .encode()?,
        })
    }

    /// Picks a candidate strategy and returns `(candidates, truncated)`.
    async fn object_candidates(
        &self,
        call: &CallContext,
        subject: &Subject,
        object_type: &str,
    ) -> DomainResult<(Vec<TypedId>, bool)> {
        let list = &self.config.list;

        let universe = if list.strategy == ListStrategy::ReverseIndex {
            None
        } else {
            let mut ids: BTreeSet<String> = self
                .tuple_reader
                .list_objects_by_type(object_type, call.snapshot)
                .await?
                .into_iter()
                .collect();
            ids.extend(call.contextual_object_ids(object_type).map(str::to_string));
            Some(ids)
        };

        match (list.strategy, universe) {
            (ListStrategy::Exhaustive, Some(ids)) => Ok(self.bounded_universe(object_type, ids)),
            (ListStrategy::Auto, Some(ids)) if ids.len() <= list.small_universe_threshold => {
                Ok(self.bounded_universe(object_type, ids))
            }
            _ => self.reverse_candidates(call, subject, object_type).await,
        }
    }

    fn bounded_universe(&self, object_type: &str, ids: BTreeSet<String>) -> (Vec<TypedId>, bool) {
        let max = self.config.list.max_candidates;
        let truncated = ids.len() > max;
        let candidates = ids
            .into_iter()
            .filter(|id| id != WILDCARD_ID)
            .take(max)
            .map(|id| TypedId::new(object_type, id))
            .collect();
        (candidates, truncated)
    }

    /// Walks the reverse index outward from the subject (and its typed
    /// wildcard), collecting every reachable object of `object_type`.
    async fn reverse_candidates(
        &self,
        call: &CallContext,
        subject: &Subject,
        object_type: &str,
    ) -> DomainResult<(Vec<TypedId>, bool)> {
        let max = self.config.list.max_candidates;
        let mut frontier: VecDeque<TypedId> = match subject {
            Subject::Object(id) => {
                VecDeque::from([id.clone(), TypedId::new(&id.object_type, WILDCARD_ID)])
            }
            Subject::Userset(us) => VecDeque::from([us.object.clone()]),
            Subject::Wildcard { user_type } => {
                VecDeque::from([TypedId::new(user_type, WILDCARD_ID)])
            }
        };
        let mut seen: HashSet<TypedId> = frontier.iter().cloned().collect();
        let mut candidates = BTreeSet::new();

        while let Some(node) = frontier.pop_front() {
            call.check_deadline()?;
            let mut edges = self
                .tuple_reader
                .find_by_user(&node.object_type, &node.object_id, call.snapshot)
                .await?;
            edges.extend(call.contextual_by_user(&node.object_type, &node.object_id));

            for edge in edges {
                if edge.condition_name.is_some() {
                    continue;
                }
                if edge.object.object_type == object_type && !candidates.contains(&edge.object) {
                    if candidates.len() >= max {
                        warn!(max, "list_objects candidate bound reached");
                        return Ok((candidates.into_iter().collect(), true));
                    }
                    candidates.insert(edge.object.clone());
                }
                if seen.insert(edge.object.clone()) {
                    frontier.push_back(edge.object);
                }
            }
        }

        Ok((candidates.into_iter().collect(), false))
    }

    /// Subjects holding `request.relation` on `request.object`.
    #[instrument(skip(self, request), fields(object = %request.object, relation = %request.relation))]
    pub async fn list_users(&self, request: &ListUsersRequest) -> DomainResult<ListUsersResult> {
        let limit = request.timeout.unwrap_or(self.config.timeout);
        match timeout(limit, self.list_users_inner(request, limit)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                duration_ms: limit.as_millis() as u64,
            }),
        }
    }

    async fn list_users_inner(
        &self,
        request: &ListUsersRequest,
        limit: Duration,
    ) -> DomainResult<ListUsersResult> {
        let object = parse_object(&request.object)?;
        validate_relation_name(&request.relation)?;
        let filters = request
            .user_types
            .iter()
            .map(|t| {
                TypeRestriction::parse(t).map_err(|_| DomainError::InvalidRequest {
                    message: format!("invalid user type filter '{t}'"),
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let call = self
            .open_call(
                request.consistency_token.as_deref(),
                &request.contextual_tuples,
                false,
                limit,
            )
            .await?;
        call.model.relation(&object.object_type, &request.relation)?;

        let mut gathered = Gathered::default();
        self.gather_users(
            &call,
            TraversalContext::root(),
            &object,
            &request.relation,
            !request.userset_granularity,
            &mut gathered,
        )
        .await?;

        let max = self.config.list.max_candidates;
        let eligible: Vec<Subject> = gathered
            .subjects
            .into_iter()
            .filter(|s| wanted(s, &filters, request.userset_granularity))
            .collect();
        let mut truncated = eligible.len() > max;
        let candidates: Vec<Subject> = eligible.into_iter().take(max).collect();
        debug!(candidates = candidates.len(), truncated, "confirming list_users candidates");

        let call_ref = &call;
        let object_ref = &object;
        let relation = request.relation.as_str();
        let confirmed: Vec<(Subject, DomainResult<bool>)> = stream::iter(candidates)
            .map(|subject| async move {
                let decision = self
                    .check_in_call(call_ref, &subject, relation, object_ref)
                    .await;
                (subject, decision)
            })
            .buffered(self.config.list.concurrency.max(1))
            .collect()
            .await;

        let mut users = Vec::new();
        for (subject, decision) in confirmed {
            match decision {
                Ok(true) => users.push(UserResult::from(&subject)),
                Ok(false) => {}
                Err(err) => {
                    absorb_candidate_error(err, &subject.to_string())?;
                    truncated = true;
                }
            }
        }

        let page_size = self.config.list.page_size(request.page_size);
        let (users, next_page_token) = paginate(
            users,
            |u| u.to_string(),
            page_size,
            request.page_token.as_deref(),
            call.model.version_id,
        )?;

        Ok(ListUsersResult {
            users,
            next_page_token,
            truncated,
            consistency_token: ConsistencyToken::new(call.snapshot, call.model.version_id)
                .encode()?,
        })
    }

    /// Collects every subject that could hold `relation` on `object`.
    fn gather_users<'a>(
        &'a self,
        call: &'a CallContext,
        ctx: TraversalContext,
        object: &'a TypedId,
        relation: &'a str,
        expand_usersets: bool,
        out: &'a mut Gathered,
    ) -> BoxFuture<'a, DomainResult<()>> {
        Box::pin(async move {
            call.check_deadline()?;
            if ctx.depth > self.config.max_depth {
                return Err(DomainError::DepthLimitExceeded {
                    max_depth: self.config.max_depth,
                });
            }
            if !out.walked.insert(format!("{object}#{relation}")) {
                return Ok(());
            }
            let Ok(relation_def) = call.model.relation(&object.object_type, relation) else {
                return Ok(());
            };
            self.gather_rewrite(call, ctx, object, relation, &relation_def.rewrite, expand_usersets, out)
                .await
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn gather_rewrite<'a>(
        &'a self,
        call: &'a CallContext,
        ctx: TraversalContext,
        object: &'a TypedId,
        relation: &'a str,
        rewrite: &'a Rewrite,
        expand_usersets: bool,
        out: &'a mut Gathered,
    ) -> BoxFuture<'a, DomainResult<()>> {
        Box::pin(async move {
            match rewrite {
                Rewrite::Direct(_) => {
                    let tuples = self.read_direct(call, object, relation, None).await?;
                    for tuple in tuples {
                        if !is_usable(&tuple, object, relation) {
                            continue;
                        }
                        if let (Subject::Userset(us), true) = (&tuple.subject, expand_usersets) {
                            self.gather_users(
                                call,
                                ctx.deeper(),
                                &us.object,
                                &us.relation,
                                expand_usersets,
                                &mut *out,
                            )
                            .await?;
                        }
                        out.subjects.insert(tuple.subject);
                    }
                }
                Rewrite::Computed(target) => {
                    self.gather_users(call, ctx.deeper(), object, target, expand_usersets, out)
                        .await?;
                }
                Rewrite::TupleToUserset {
                    tupleset,
                    computed_relation,
                } => {
                    for target in self.tupleset_targets(call, object, tupleset).await? {
                        self.gather_users(
                            call,
                            ctx.deeper(),
                            &target,
                            computed_relation,
                            expand_usersets,
                            &mut *out,
                        )
                        .await?;
                    }
                }
                Rewrite::Union(children) | Rewrite::Intersection(children) => {
                    for child in children {
                        self.gather_rewrite(
                            call,
                            ctx.clone(),
                            object,
                            relation,
                            child,
                            expand_usersets,
                            &mut *out,
                        )
                        .await?;
                    }
                }
                // Only the base can contribute subjects.
                Rewrite::Exclusion { base, .. } => {
                    self.gather_rewrite(call, ctx, object, relation, base, expand_usersets, out)
                        .await?;
                }
            }
            Ok(())
        })
    }
}

/// Whether a gathered subject may appear in a ListUsers result.
///
/// Usersets are returned only with userset granularity or when a filter
/// names their `type#relation` explicitly. A `type:*` filter keeps only the
/// wildcard of that type; a plain `type` filter keeps concrete subjects and
/// the wildcard.
fn wanted(subject: &Subject, filters: &[TypeRestriction], userset_granularity: bool) -> bool {
    let matches_filter = |f: &TypeRestriction| {
        f.type_name == subject.user_type()
            && (!f.wildcard || matches!(subject, Subject::Wildcard { .. }))
            && match subject.user_relation() {
                Some(relation) => f.relation.as_deref().map_or(true, |r| r == relation),
                None => f.relation.is_none(),
            }
    };

    if let Subject::Userset(_) = subject {
        let named = filters
            .iter()
            .any(|f| f.relation.is_some() && matches_filter(f));
        if !(userset_granularity || named) {
            return false;
        }
    }
    filters.is_empty() || filters.iter().any(matches_filter)
}

/// A candidate that cannot be evaluated is dropped and the result marked
/// truncated. Deadline and store failures abort the whole call.
fn absorb_candidate_error(err: DomainError, candidate: &str) -> DomainResult<()> {
    match err {
        DomainError::Timeout { .. } | DomainError::Storage { .. } => Err(err),
        other => {
            warn!(candidate, error = %other, "dropping candidate that failed to evaluate");
            Ok(())
        }
    }
}
