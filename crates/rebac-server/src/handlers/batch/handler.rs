//! Batch check handler implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rebac_domain::resolver::{CheckRequest, GraphResolver, ModelReader, TupleReader};
use tracing::{debug, instrument};

use super::singleflight::{Singleflight, SingleflightGuard, SingleflightSlot};
use super::types::{
    BatchCheckError, BatchCheckItem, BatchCheckItemResult, BatchCheckRequest, BatchCheckResponse,
    BatchCheckResult, MAX_BATCH_SIZE,
};

/// Default number of unique checks evaluated at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Identity of a check for deduplication.
///
/// The consistency token is part of the key so that callers pinned to
/// different snapshots never share a decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CheckKey {
    pub user: String,
    pub relation: String,
    pub object: String,
    pub consistency_token: Option<String>,
}

impl CheckKey {
    /// Returns `None` for items carrying contextual tuples; those are
    /// request-scoped and never shared.
    pub fn for_item(item: &BatchCheckItem, consistency_token: Option<&str>) -> Option<Self> {
        if !item.contextual_tuples.is_empty() {
            return None;
        }
        Some(Self {
            user: item.user.clone(),
            relation: item.relation.clone(),
            object: item.object.clone(),
            consistency_token: consistency_token.map(str::to_string),
        })
    }
}

/// Handler for batch permission checks.
///
/// Identical items in one batch run once, and concurrent batches asking the
/// same question share one evaluation through the singleflight. Unique
/// items are evaluated with bounded parallelism; results come back in
/// request order.
pub struct BatchCheckHandler<T, M> {
    resolver: Arc<GraphResolver<T, M>>,
    singleflight: Arc<Singleflight<CheckKey, BatchCheckItemResult>>,
    max_items: usize,
    concurrency: usize,
}

impl<T, M> BatchCheckHandler<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    pub fn new(resolver: Arc<GraphResolver<T, M>>) -> Self {
        Self {
            resolver,
            singleflight: Arc::new(Singleflight::new()),
            max_items: MAX_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Overrides the batch size limit and worker count. Zero values fall
    /// back to one.
    pub fn with_limits(mut self, max_items: usize, concurrency: usize) -> Self {
        self.max_items = max_items.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Unique checks currently being evaluated on behalf of any batch.
    pub fn in_flight_checks(&self) -> usize {
        self.singleflight.in_flight()
    }

    /// Rejects empty and oversized batches. Malformed items are not a
    /// batch-level failure; they fail individually.
    pub fn validate(&self, request: &BatchCheckRequest) -> BatchCheckResult<()> {
        if request.checks.is_empty() {
            return Err(BatchCheckError::EmptyBatch);
        }
        if request.checks.len() > self.max_items {
            return Err(BatchCheckError::BatchTooLarge {
                size: request.checks.len(),
                max: self.max_items,
            });
        }
        Ok(())
    }

    /// Executes a batch check request.
    ///
    /// The results are returned in the same order as the input checks.
    #[instrument(skip(self, request), fields(items = request.checks.len()))]
    pub async fn check(&self, request: BatchCheckRequest) -> BatchCheckResult<BatchCheckResponse> {
        self.validate(&request)?;
        let BatchCheckRequest {
            checks,
            consistency_token: token,
        } = request;

        let mut unique: Vec<(BatchCheckItem, Option<CheckKey>)> = Vec::new();
        let mut key_to_index: HashMap<CheckKey, usize> = HashMap::new();
        let mut position_to_unique: Vec<usize> = Vec::with_capacity(checks.len());
        let total = checks.len();

        for item in checks {
            let index = match CheckKey::for_item(&item, token.as_deref()) {
                Some(key) => match key_to_index.get(&key) {
                    Some(&index) => index,
                    None => {
                        let index = unique.len();
                        key_to_index.insert(key.clone(), index);
                        unique.push((item, Some(key)));
                        index
                    }
                },
                None => {
                    unique.push((item, None));
                    unique.len() - 1
                }
            };
            position_to_unique.push(index);
        }

        let deduplicated = total - unique.len();
        metrics::counter!("rebac_batch_check_items_total").increment(total as u64);
        metrics::counter!("rebac_batch_check_deduplicated_total").increment(deduplicated as u64);
        debug!(unique = unique.len(), deduplicated, "batch deduplicated");

        let unique_results: Vec<BatchCheckItemResult> = stream::iter(unique)
            .map(move |(item, key)| {
                let token = token.clone();
                async move { self.execute(&item, token.as_deref(), key).await }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let results = position_to_unique
            .into_iter()
            .map(|index| unique_results[index].clone())
            .collect();

        Ok(BatchCheckResponse { results })
    }

    async fn execute(
        &self,
        item: &BatchCheckItem,
        token: Option<&str>,
        key: Option<CheckKey>,
    ) -> BatchCheckItemResult {
        match key {
            Some(key) => self.execute_with_singleflight(item, token, key).await,
            None => self.run_check(item, token).await,
        }
    }

    /// Joins an in-flight evaluation of the same key, or runs it and
    /// broadcasts the result.
    async fn execute_with_singleflight(
        &self,
        item: &BatchCheckItem,
        token: Option<&str>,
        key: CheckKey,
    ) -> BatchCheckItemResult {
        loop {
            match self.singleflight.acquire(key.clone()) {
                SingleflightSlot::Follower(mut receiver) => {
                    if let Ok(result) = receiver.recv().await {
                        metrics::counter!("rebac_batch_check_singleflight_shared_total").increment(1);
                        return result;
                    }
                    // The leader went away without sending to us; its guard
                    // already cleared the slot, so try again as leader.
                }
                SingleflightSlot::Leader(sender) => {
                    let guard = SingleflightGuard::new(&self.singleflight, key);
                    metrics::gauge!("rebac_batch_check_in_flight").set(self.in_flight_checks() as f64);
                    let result = self.run_check(item, token).await;
                    let _ = sender.send(result.clone());
                    guard.complete();
                    metrics::gauge!("rebac_batch_check_in_flight").set(self.in_flight_checks() as f64);
                    return result;
                }
            }
        }
    }

    async fn run_check(&self, item: &BatchCheckItem, token: Option<&str>) -> BatchCheckItemResult {
        let mut request = CheckRequest::new(item.user.as_str(), item.relation.as_str(), item.object.as_str());
        if !item.contextual_tuples.is_empty() {
            request = request.with_contextual_tuples(item.contextual_tuples.clone());
        }
        if let Some(token) = token {
            request = request.with_consistency_token(token);
        }

        match self.resolver.check(&request).await {
            Ok(result) => BatchCheckItemResult {
                allowed: result.allowed,
                error: None,
                consistency_token: Some(result.consistency_token),
            },
            Err(err) => {
                debug!(error = %err, object = %item.object, "batch item failed");
                BatchCheckItemResult::failed(&err)
            }
        }
    }

    /// Returns (total_checks, unique_checks) for a batch request.
    pub fn dedup_stats(&self, request: &BatchCheckRequest) -> (usize, usize) {
        let token = request.consistency_token.as_deref();
        let mut seen: HashSet<CheckKey> = HashSet::with_capacity(request.checks.len());
        let mut unkeyed = 0;
        for item in &request.checks {
            match CheckKey::for_item(item, token) {
                Some(key) => {
                    seen.insert(key);
                }
                None => unkeyed += 1,
            }
        }
        (request.checks.len(), seen.len() + unkeyed)
    }
}
