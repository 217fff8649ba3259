//! Graph resolver for permission checks.
//!
//! The resolver interprets a relation's rewrite tree against one tuple
//! snapshot to decide whether a subject holds the relation on an object.
//!
//! - **Evaluation order**: union and intersection children are evaluated
//!   one after another in declared order and short-circuit, so the first
//!   reported path is deterministic.
//!
//! - **Cycle Detection**: each `(user, relation, object)` on the current path
//!   is tracked in an `Arc<HashSet>` cloned on write. Revisiting one makes
//!   that branch "cyclic": not granting inside unions and fan-outs, and
//!   propagated through intersection and exclusion. A cyclic root is
//!   reported as [`DomainError::CycleDetected`].
//!
//! - **Memoization**: decisions computed without cutting a cycle are
//!   memoized for the rest of the call. The memo never outlives the call.
//!
//! - **Depth Limiting**: every relation hop adds one level; exceeding
//!   `max_depth` is an error, never a silent deny.
//!
//! - **Deadlines**: checked at every step, with `tokio::time::timeout`
//!   around the whole call.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::cache::DecisionKey;
use crate::error::{DomainError, DomainResult};
use crate::model::{Rewrite, Subject, TupleKey, TypeRestriction, TypedId};

use super::config::ResolverConfig;
use super::context::{is_usable, CallContext, ContextualTuple, TraversalContext};
use super::token::ConsistencyToken;
use super::traits::{ModelReader, SubjectFilter, TupleReader};
use super::types::{CheckRequest, CheckResult, NodeType, ResolutionNode, StoredTupleRef};

/// Cache should never block a check; a slow cache is treated as a miss.
const CACHE_OP_TIMEOUT: Duration = Duration::from_millis(10);

/// Type alias for boxed future to handle async recursion.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Metrics for decision cache usage.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Lookups bypassed because of contextual tuples or tracing.
    pub skips: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub skips: u64,
}

/// Three-valued outcome of evaluating one rewrite node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Allowed,
    Denied,
    /// Depends on a relation already on the current path.
    Cyclic,
}

#[derive(Debug)]
pub(crate) struct Eval {
    pub(crate) outcome: Outcome,
    /// First visit key cut on the way to this result, if any.
    pub(crate) cycle: Option<String>,
    pub(crate) node: Option<ResolutionNode>,
}

impl Eval {
    fn crisp(allowed: bool) -> Self {
        Self {
            outcome: if allowed {
                Outcome::Allowed
            } else {
                Outcome::Denied
            },
            cycle: None,
            node: None,
        }
    }

    fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allowed
    }
}

/// Combines fan-out children: any grant wins, a cycle counts as no grant
/// unless every child was cyclic.
fn combine_any(children: &[Eval], has_crisp_deny: bool) -> (Outcome, Option<String>) {
    let cycle = children.iter().find_map(|e| e.cycle.clone());
    let outcome = if children.iter().any(Eval::is_allowed) {
        Outcome::Allowed
    } else if has_crisp_deny || children.iter().any(|e| e.outcome == Outcome::Denied) {
        Outcome::Denied
    } else {
        Outcome::Cyclic
    };
    (outcome, cycle)
}

/// Graph resolver for permission checks.
///
/// Cheap to share behind an `Arc`; every call builds its own context.
pub struct GraphResolver<T, M> {
    pub(crate) tuple_reader: Arc<T>,
    pub(crate) model_reader: Arc<M>,
    pub(crate) config: ResolverConfig,
    cache_metrics: CacheMetrics,
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Creates a new graph resolver with default configuration.
    pub fn new(tuple_reader: Arc<T>, model_reader: Arc<M>) -> Self {
        Self::with_config(tuple_reader, model_reader, ResolverConfig::default())
    }

    pub fn with_config(tuple_reader: Arc<T>, model_reader: Arc<M>, config: ResolverConfig) -> Self {
        Self {
            tuple_reader,
            model_reader,
            config,
            cache_metrics: CacheMetrics::default(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache_metrics(&self) -> &CacheMetrics {
        &self.cache_metrics
    }

    /// Checks whether `request.user` holds `request.relation` on `request.object`.
    #[instrument(
        skip(self, request),
        fields(user = %request.user, relation = %request.relation, object = %request.object)
    )]
    pub async fn check(&self, request: &CheckRequest) -> DomainResult<CheckResult> {
        let limit = request.timeout.unwrap_or(self.config.timeout);
        let result = match timeout(limit, self.check_inner(request, limit)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                duration_ms: limit.as_millis() as u64,
            }),
        };

        let outcome = match &result {
            Ok(r) if r.allowed => "allowed",
            Ok(_) => "denied",
            Err(_) => "error",
        };
        metrics::counter!("rebac_checks_total", "outcome" => outcome).increment(1);
        result
    }

    async fn check_inner(&self, request: &CheckRequest, limit: Duration) -> DomainResult<CheckResult> {
        let subject = Subject::parse(&request.user)?;
        if subject.is_wildcard() {
            return Err(DomainError::InvalidUserFormat {
                value: request.user.clone(),
            });
        }
        let object = parse_object(&request.object)?;
        validate_relation_name(&request.relation)?;

        let call = self
            .open_call(
                request.consistency_token.as_deref(),
                &request.contextual_tuples,
                request.trace,
                limit,
            )
            .await?;
        call.model.relation(&object.object_type, &request.relation)?;
        let consistency_token =
            ConsistencyToken::new(call.snapshot, call.model.version_id).encode()?;

        let cache_key = self.cache_key(&call, request);
        if let Some(key) = &cache_key {
            if let Ok(Some(allowed)) = timeout(CACHE_OP_TIMEOUT, self.cache_get(key)).await {
                self.cache_metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!("decision cache hit");
                return Ok(CheckResult {
                    allowed,
                    resolution: None,
                    consistency_token,
                });
            }
            self.cache_metrics.misses.fetch_add(1, Ordering::Relaxed);
        }

        let eval = self
            .check_relation(&call, &TraversalContext::root(), &subject, &request.relation, &object)
            .await?;
        let allowed = root_decision(&eval)?;

        if let (Some(key), Some(cache)) = (cache_key, &self.config.cache) {
            let _ = timeout(CACHE_OP_TIMEOUT, cache.insert(key, allowed)).await;
        }

        Ok(CheckResult {
            allowed,
            resolution: eval.node,
            consistency_token,
        })
    }

    fn cache_key(&self, call: &CallContext, request: &CheckRequest) -> Option<DecisionKey> {
        self.config.cache.as_ref().filter(|c| c.is_enabled())?;
        if !request.contextual_tuples.is_empty() || request.trace {
            self.cache_metrics.skips.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(DecisionKey::new(
            call.model.version_id,
            request.user.as_str(),
            request.relation.as_str(),
            request.object.as_str(),
            call.snapshot,
        ))
    }

    async fn cache_get(&self, key: &DecisionKey) -> Option<bool> {
        match &self.config.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    /// Resolves the model and tuple snapshot for a call and parses its
    /// contextual tuples.
    pub(crate) async fn open_call(
        &self,
        consistency_token: Option<&str>,
        contextual_tuples: &[TupleKey],
        trace: bool,
        limit: Duration,
    ) -> DomainResult<CallContext> {
        let (model, snapshot) = match consistency_token {
            Some(encoded) => {
                let token = ConsistencyToken::decode(encoded)?;
                if token.txid > self.tuple_reader.current_txid().await? {
                    return Err(DomainError::InvalidConsistencyToken {
                        message: format!("transaction {} has not been committed", token.txid),
                    });
                }
                let model = self.model_reader.get_model(token.model_version).await?;
                (model, token.txid)
            }
            None => {
                let model = self.model_reader.get_active_model().await?;
                let snapshot = self.tuple_reader.current_txid().await?;
                (model, snapshot)
            }
        };

        let mut contextual = Vec::with_capacity(contextual_tuples.len());
        for key in contextual_tuples {
            model.validate_tuple(key)?;
            let (subject, object) = key.parse()?;
            let mut tuple = StoredTupleRef::new(subject);
            tuple.condition_name = key.condition_name.clone();
            tuple.condition_context = key.condition_context.clone();
            contextual.push(ContextualTuple {
                object,
                relation: key.relation.clone(),
                tuple,
            });
        }

        Ok(CallContext::new(model, snapshot, contextual, trace, limit))
    }

    /// Decides one `(subject, relation, object)` inside an open call.
    ///
    /// Shares the call's memo, so list confirmation reuses work across
    /// candidates.
    pub(crate) async fn check_in_call(
        &self,
        call: &CallContext,
        subject: &Subject,
        relation: &str,
        object: &TypedId,
    ) -> DomainResult<bool> {
        let eval = self
            .check_relation(call, &TraversalContext::root(), subject, relation, object)
            .await?;
        root_decision(&eval)
    }

    /// Live tuples on `(object, relation)` from the store and the request.
    pub(crate) async fn read_direct(
        &self,
        call: &CallContext,
        object: &TypedId,
        relation: &str,
        filter: Option<&SubjectFilter>,
    ) -> DomainResult<Vec<StoredTupleRef>> {
        let mut tuples = self
            .tuple_reader
            .find_direct(object, relation, filter, call.snapshot)
            .await?;
        tuples.extend(call.contextual_direct(object, relation, filter));
        Ok(tuples)
    }

    /// Concrete objects reached through `tupleset` on `object`, sorted.
    pub(crate) async fn tupleset_targets(
        &self,
        call: &CallContext,
        object: &TypedId,
        tupleset: &str,
    ) -> DomainResult<Vec<TypedId>> {
        let mut tuples = self
            .tuple_reader
            .find_tupleset_targets(object, tupleset, call.snapshot)
            .await?;
        tuples.extend(call.contextual_direct(object, tupleset, None));

        let mut targets: Vec<TypedId> = tuples
            .into_iter()
            .filter(|t| is_usable(t, object, tupleset))
            .filter_map(|t| match t.subject {
                Subject::Object(id) => Some(id),
                _ => None,
            })
            .collect();
        targets.sort();
        targets.dedup();
        Ok(targets)
    }

    /// Evaluates one relation on one object for one subject.
    pub(crate) fn check_relation<'a>(
        &'a self,
        call: &'a CallContext,
        ctx: &'a TraversalContext,
        subject: &'a Subject,
        relation: &'a str,
        object: &'a TypedId,
    ) -> BoxFuture<'a, DomainResult<Eval>> {
        Box::pin(async move {
            call.check_deadline()?;
            if ctx.depth > self.config.max_depth {
                return Err(DomainError::DepthLimitExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            let label = format!("{object}#{relation}");
            let key = format!("{label}@{subject}");

            if ctx.is_on_path(&key) {
                debug!(key = %key, "cycle detected");
                return Ok(Eval {
                    outcome: Outcome::Cyclic,
                    node: call
                        .trace
                        .then(|| ResolutionNode::leaf(NodeType::Cycle, label, false)),
                    cycle: Some(key),
                });
            }

            if let Some(allowed) = call.memo.get(&key).map(|v| *v) {
                let mut eval = Eval::crisp(allowed);
                eval.node = call
                    .trace
                    .then(|| ResolutionNode::leaf(NodeType::Cached, label, allowed));
                return Ok(eval);
            }

            let started = Instant::now();
            let relation_def = call.model.relation(&object.object_type, relation)?;
            let inner = ctx.enter(&key);
            let mut eval = self
                .eval_rewrite(call, &inner, subject, relation, object, &relation_def.rewrite)
                .await?;

            if eval.cycle.is_none() {
                call.memo.insert(key, eval.is_allowed());
            }
            if call.trace {
                eval.node = Some(ResolutionNode {
                    node_type: NodeType::Relation,
                    label,
                    result: eval.is_allowed(),
                    children: eval.node.take().into_iter().collect(),
                    duration_us: started.elapsed().as_micros() as u64,
                });
            }
            Ok(eval)
        })
    }

    fn eval_rewrite<'a>(
        &'a self,
        call: &'a CallContext,
        ctx: &'a TraversalContext,
        subject: &'a Subject,
        relation: &'a str,
        object: &'a TypedId,
        rewrite: &'a Rewrite,
    ) -> BoxFuture<'a, DomainResult<Eval>> {
        Box::pin(async move {
            call.check_deadline()?;
            let started = Instant::now();

            let (outcome, cycle, children, label) = match rewrite {
                Rewrite::Direct(restrictions) => {
                    let (outcome, cycle, children) = self
                        .eval_direct(call, ctx, subject, relation, object, restrictions)
                        .await?;
                    (outcome, cycle, children, "direct".to_string())
                }
                Rewrite::Computed(target) => {
                    let child = self
                        .check_relation(call, &ctx.deeper(), subject, target, object)
                        .await?;
                    (child.outcome, child.cycle.clone(), vec![child], target.clone())
                }
                Rewrite::TupleToUserset {
                    tupleset,
                    computed_relation,
                } => {
                    let (outcome, cycle, children) = self
                        .eval_tuple_to_userset(call, ctx, subject, object, tupleset, computed_relation)
                        .await?;
                    (outcome, cycle, children, format!("{tupleset}->{computed_relation}"))
                }
                Rewrite::Union(branches) => {
                    let mut children = Vec::with_capacity(branches.len());
                    for branch in branches {
                        let child = self
                            .eval_rewrite(call, ctx, subject, relation, object, branch)
                            .await?;
                        let done = child.is_allowed();
                        children.push(child);
                        if done {
                            break;
                        }
                    }
                    let (outcome, cycle) = combine_any(&children, false);
                    (outcome, cycle, children, "union".to_string())
                }
                Rewrite::Intersection(branches) => {
                    let mut children = Vec::with_capacity(branches.len());
                    for branch in branches {
                        let child = self
                            .eval_rewrite(call, ctx, subject, relation, object, branch)
                            .await?;
                        let denied = child.outcome == Outcome::Denied;
                        children.push(child);
                        if denied {
                            break;
                        }
                    }
                    let cycle = children.iter().find_map(|e| e.cycle.clone());
                    let outcome = if children.is_empty()
                        || children.iter().any(|e| e.outcome == Outcome::Denied)
                    {
                        Outcome::Denied
                    } else if children.iter().any(|e| e.outcome == Outcome::Cyclic) {
                        Outcome::Cyclic
                    } else {
                        Outcome::Allowed
                    };
                    (outcome, cycle, children, "intersection".to_string())
                }
                Rewrite::Exclusion { base, subtract } => {
                    let base_eval = self
                        .eval_rewrite(call, ctx, subject, relation, object, base)
                        .await?;
                    let skip_subtract = base_eval.outcome == Outcome::Denied && !call.trace;
                    let mut children = vec![base_eval];
                    if !skip_subtract {
                        let subtract_eval = self
                            .eval_rewrite(call, ctx, subject, relation, object, subtract)
                            .await?;
                        children.push(subtract_eval);
                    }
                    let cycle = children.iter().find_map(|e| e.cycle.clone());
                    let outcome = match (children[0].outcome, children.get(1).map(|e| e.outcome)) {
                        (Outcome::Denied, _) => Outcome::Denied,
                        (Outcome::Cyclic, _) => Outcome::Cyclic,
                        (Outcome::Allowed, Some(Outcome::Allowed)) => Outcome::Denied,
                        (Outcome::Allowed, Some(Outcome::Denied)) => Outcome::Allowed,
                        (Outcome::Allowed, Some(Outcome::Cyclic)) => Outcome::Cyclic,
                        (Outcome::Allowed, None) => Outcome::Allowed,
                    };
                    (outcome, cycle, children, "exclusion".to_string())
                }
            };

            let node = call.trace.then(|| ResolutionNode {
                node_type: node_type(rewrite),
                label,
                result: outcome == Outcome::Allowed,
                children: children.into_iter().filter_map(|c| c.node).collect(),
                duration_us: started.elapsed().as_micros() as u64,
            });
            Ok(Eval {
                outcome,
                cycle,
                node,
            })
        })
    }

    /// Direct grants: an exact tuple, a typed wildcard, or membership of a
    /// stored userset.
    async fn eval_direct(
        &self,
        call: &CallContext,
        ctx: &TraversalContext,
        subject: &Subject,
        relation: &str,
        object: &TypedId,
        restrictions: &[TypeRestriction],
    ) -> DomainResult<(Outcome, Option<String>, Vec<Eval>)> {
        let admitted =
            |s: &Subject| restrictions.is_empty() || restrictions.iter().any(|r| r.admits(s));
        let grants = |tuples: &[StoredTupleRef]| {
            tuples
                .iter()
                .any(|t| is_usable(t, object, relation) && admitted(&t.subject))
        };

        let exact = SubjectFilter::Exact(subject.clone());
        if grants(&self.read_direct(call, object, relation, Some(&exact)).await?) {
            return Ok((Outcome::Allowed, None, Vec::new()));
        }

        if let Subject::Object(id) = subject {
            let wildcard = Subject::Wildcard {
                user_type: id.object_type.clone(),
            };
            if admitted(&wildcard) {
                let filter = SubjectFilter::Exact(wildcard);
                if grants(&self.read_direct(call, object, relation, Some(&filter)).await?) {
                    return Ok((Outcome::Allowed, None, Vec::new()));
                }
            }
        }

        let mut usersets: Vec<Subject> = self
            .read_direct(call, object, relation, Some(&SubjectFilter::Usersets))
            .await?
            .into_iter()
            .filter(|t| is_usable(t, object, relation) && admitted(&t.subject) && &t.subject != subject)
            .map(|t| t.subject)
            .collect();
        usersets.sort();
        usersets.dedup();

        let deeper = ctx.deeper();
        let mut children = Vec::new();
        for userset in &usersets {
            let Subject::Userset(us) = userset else {
                continue;
            };
            if call
                .model
                .relation(&us.object.object_type, &us.relation)
                .is_err()
            {
                debug!(userset = %us, "skipping userset with unknown relation");
                continue;
            }
            let child = self
                .check_relation(call, &deeper, subject, &us.relation, &us.object)
                .await?;
            let done = child.is_allowed();
            children.push(child);
            if done {
                break;
            }
        }

        let (outcome, cycle) = combine_any(&children, true);
        Ok((outcome, cycle, children))
    }

    async fn eval_tuple_to_userset(
        &self,
        call: &CallContext,
        ctx: &TraversalContext,
        subject: &Subject,
        object: &TypedId,
        tupleset: &str,
        computed_relation: &str,
    ) -> DomainResult<(Outcome, Option<String>, Vec<Eval>)> {
        let targets = self.tupleset_targets(call, object, tupleset).await?;

        let deeper = ctx.deeper();
        let mut children = Vec::new();
        for target in &targets {
            if call
                .model
                .relation(&target.object_type, computed_relation)
                .is_err()
            {
                debug!(target = %target, computed_relation, "target type lacks relation, skipping");
                continue;
            }
            let child = self
                .check_relation(call, &deeper, subject, computed_relation, target)
                .await?;
            let done = child.is_allowed();
            children.push(child);
            if done {
                break;
            }
        }

        let (outcome, cycle) = combine_any(&children, children.is_empty());
        Ok((outcome, cycle, children))
    }
}

/// Turns the root evaluation into a decision.
fn root_decision(eval: &Eval) -> DomainResult<bool> {
    match eval.outcome {
        Outcome::Allowed => Ok(true),
        Outcome::Denied => Ok(false),
        Outcome::Cyclic => Err(DomainError::CycleDetected {
            path: eval.cycle.clone().unwrap_or_default(),
        }),
    }
}

fn node_type(rewrite: &Rewrite) -> NodeType {
    match rewrite {
        Rewrite::Direct(_) => NodeType::Direct,
        Rewrite::Computed(_) => NodeType::Computed,
        Rewrite::TupleToUserset { .. } => NodeType::TupleToUserset,
        Rewrite::Union(_) => NodeType::Union,
        Rewrite::Intersection(_) => NodeType::Intersection,
        Rewrite::Exclusion { .. } => NodeType::Exclusion,
    }
}

/// Parses a concrete object; wildcards are not objects.
pub(crate) fn parse_object(value: &str) -> DomainResult<TypedId> {
    let object = TypedId::parse(value)?;
    if object.is_wildcard() {
        return Err(DomainError::InvalidObjectFormat {
            value: value.to_string(),
        });
    }
    Ok(object)
}

pub(crate) fn validate_relation_name(relation: &str) -> DomainResult<()> {
    if relation.is_empty() || relation.contains([':', '#', '@']) {
        return Err(DomainError::InvalidRelationFormat {
            value: relation.to_string(),
        });
    }
    Ok(())
}
