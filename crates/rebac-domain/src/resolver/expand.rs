//! Expand: the full userset tree behind a relation.
//!
//! Unlike check, expand never short-circuits. Computed relations,
//! tuple-to-userset targets and stored usersets are all expanded in place,
//! guarded by the same depth limit and a per-path cycle check on
//! `object#relation`. Each `object#relation` is expanded once per call;
//! later occurrences become `Ref` nodes pointing at the first.

use std::time::Duration;

use tokio::time::timeout;
use tracing::instrument;

use crate::error::{DomainError, DomainResult};
use crate::model::{Rewrite, Subject, TypedId};

use super::context::{is_usable, CallContext, TraversalContext};
use super::graph_resolver::{parse_object, validate_relation_name, BoxFuture, GraphResolver};
use super::token::ConsistencyToken;
use super::traits::{ModelReader, TupleReader};
use super::types::{ExpandNode, ExpandRequest, ExpandResult};

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    #[instrument(skip(self, request), fields(object = %request.object, relation = %request.relation))]
    pub async fn expand(&self, request: &ExpandRequest) -> DomainResult<ExpandResult> {
        let limit = request.timeout.unwrap_or(self.config.timeout);
        match timeout(limit, self.expand_inner(request, limit)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                duration_ms: limit.as_millis() as u64,
            }),
        }
    }

    async fn expand_inner(&self, request: &ExpandRequest, limit: Duration) -> DomainResult<ExpandResult> {
        let object = parse_object(&request.object)?;
        validate_relation_name(&request.relation)?;

        let call = self
            .open_call(request.consistency_token.as_deref(), &[], false, limit)
            .await?;
        call.model.relation(&object.object_type, &request.relation)?;

        let tree = self
            .expand_relation(&call, &TraversalContext::root(), &object, &request.relation)
            .await?;
        Ok(ExpandResult {
            tree,
            consistency_token: ConsistencyToken::new(call.snapshot, call.model.version_id)
                .encode()?,
        })
    }

    fn expand_relation<'a>(
        &'a self,
        call: &'a CallContext,
        ctx: &'a TraversalContext,
        object: &'a TypedId,
        relation: &'a str,
    ) -> BoxFuture<'a, DomainResult<ExpandNode>> {
        Box::pin(async move {
            call.check_deadline()?;
            if ctx.depth > self.config.max_depth {
                return Err(DomainError::DepthLimitExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            let name = format!("{object}#{relation}");
            if ctx.is_on_path(&name) {
                return Ok(ExpandNode::Cycle { name });
            }
            if !call.expanded.insert(name.clone()) {
                return Ok(ExpandNode::Ref { name });
            }

            let relation_def = call.model.relation(&object.object_type, relation)?;
            let inner = ctx.enter(&name);
            self.expand_rewrite(call, &inner, object, relation, &relation_def.rewrite)
                .await
        })
    }

    fn expand_rewrite<'a>(
        &'a self,
        call: &'a CallContext,
        ctx: &'a TraversalContext,
        object: &'a TypedId,
        relation: &'a str,
        rewrite: &'a Rewrite,
    ) -> BoxFuture<'a, DomainResult<ExpandNode>> {
        Box::pin(async move {
            call.check_deadline()?;
            let name = format!("{object}#{relation}");

            let node = match rewrite {
                Rewrite::Direct(_) => {
                    let mut subjects: Vec<Subject> = self
                        .read_direct(call, object, relation, None)
                        .await?
                        .into_iter()
                        .filter(|t| is_usable(t, object, relation))
                        .map(|t| t.subject)
                        .collect();
                    subjects.sort();
                    subjects.dedup();

                    let deeper = ctx.deeper();
                    let mut expanded = Vec::new();
                    for subject in &subjects {
                        if let Subject::Userset(us) = subject {
                            if call
                                .model
                                .relation(&us.object.object_type, &us.relation)
                                .is_ok()
                            {
                                expanded.push(
                                    self.expand_relation(call, &deeper, &us.object, &us.relation)
                                        .await?,
                                );
                            }
                        }
                    }

                    ExpandNode::Leaf {
                        name,
                        users: subjects.iter().map(ToString::to_string).collect(),
                        expanded,
                    }
                }
                Rewrite::Computed(target) => ExpandNode::Computed {
                    name,
                    relation: target.clone(),
                    child: Box::new(
                        self.expand_relation(call, &ctx.deeper(), object, target)
                            .await?,
                    ),
                },
                Rewrite::TupleToUserset {
                    tupleset,
                    computed_relation,
                } => {
                    let deeper = ctx.deeper();
                    let mut children = Vec::new();
                    for target in self.tupleset_targets(call, object, tupleset).await? {
                        if call
                            .model
                            .relation(&target.object_type, computed_relation)
                            .is_err()
                        {
                            continue;
                        }
                        children.push(
                            self.expand_relation(call, &deeper, &target, computed_relation)
                                .await?,
                        );
                    }
                    ExpandNode::TupleToUserset {
                        name,
                        tupleset: tupleset.clone(),
                        computed_relation: computed_relation.clone(),
                        children,
                    }
                }
                Rewrite::Union(branches) => ExpandNode::Union {
                    children: self.expand_all(call, ctx, object, relation, branches).await?,
                    name,
                },
                Rewrite::Intersection(branches) => ExpandNode::Intersection {
                    children: self.expand_all(call, ctx, object, relation, branches).await?,
                    name,
                },
                Rewrite::Exclusion { base, subtract } => ExpandNode::Exclusion {
                    base: Box::new(self.expand_rewrite(call, ctx, object, relation, base).await?),
                    subtract: Box::new(
                        self.expand_rewrite(call, ctx, object, relation, subtract)
                            .await?,
                    ),
                    name,
                },
            };
            Ok(node)
        })
    }

    async fn expand_all(
        &self,
        call: &CallContext,
        ctx: &TraversalContext,
        object: &TypedId,
        relation: &str,
        branches: &[Rewrite],
    ) -> DomainResult<Vec<ExpandNode>> {
        let mut children = Vec::with_capacity(branches.len());
        for branch in branches {
            children.push(self.expand_rewrite(call, ctx, object, relation, branch).await?);
        }
        Ok(children)
    }
}
