//! Transport-agnostic authorization service.
//!
//! `AuthorizationService` wires the in-memory tuple store, the model store,
//! the graph resolver and the batch handler together from a
//! [`ServiceConfig`]. Hosts embed it behind whatever transport they expose.

use std::sync::Arc;

use rebac_domain::error::{DomainError, DomainResult};
use rebac_domain::model::{AuthorizationModel, ModelStore, ModelVersionSummary, Subject, TupleKey};
use rebac_domain::resolver::{
    CheckRequest, CheckResult, ConsistencyToken, ExpandRequest, ExpandResult, GraphResolver,
    ListObjectsRequest, ListObjectsResult, ListUsersRequest, ListUsersResult, ModelReader,
};
use rebac_storage::{MemoryTupleStore, StorageError, StoredTuple, TupleFilter, TupleStore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::adapters::{map_storage_error, StoreTupleReader};
use crate::config::{ConfigLoadError, ServiceConfig};
use crate::handlers::batch::{
    BatchCheckHandler, BatchCheckRequest, BatchCheckResponse, BatchCheckResult,
};

type Reader = StoreTupleReader<MemoryTupleStore>;

/// Outcome of a tuple write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Token pinning the snapshot that includes this write.
    pub consistency_token: String,
    pub written: usize,
    pub deleted: usize,
}

/// Tuples matching a read filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub tuples: Vec<TupleKey>,
    pub consistency_token: String,
}

/// The authorization service.
pub struct AuthorizationService {
    store: Arc<MemoryTupleStore>,
    models: Arc<ModelStore>,
    resolver: Arc<GraphResolver<Reader, ModelStore>>,
    batch: BatchCheckHandler<Reader, ModelStore>,
    retention_txids: Option<u64>,
}

impl AuthorizationService {
    /// Builds a service from a validated configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigLoadError> {
        config.validate()?;

        let store = MemoryTupleStore::new_shared();
        let models = Arc::new(ModelStore::new());
        let reader = Arc::new(StoreTupleReader::new(Arc::clone(&store)));
        let resolver = Arc::new(GraphResolver::with_config(
            reader,
            Arc::clone(&models),
            config.resolver_config(),
        ));
        let batch = BatchCheckHandler::new(Arc::clone(&resolver))
            .with_limits(config.batch.max_items, config.batch.concurrency);

        info!(
            backend = %config.storage.backend,
            max_depth = config.resolver.max_depth,
            cache = config.cache.enabled,
            "authorization service ready"
        );
        Ok(Self {
            store,
            models,
            resolver,
            batch,
            retention_txids: config.storage.retention_txids,
        })
    }

    pub fn tuple_store(&self) -> &Arc<MemoryTupleStore> {
        &self.store
    }

    pub fn model_store(&self) -> &Arc<ModelStore> {
        &self.models
    }

    pub fn resolver(&self) -> &Arc<GraphResolver<Reader, ModelStore>> {
        &self.resolver
    }

    // ---- model administration ----

    /// Validates and stores a new model version without activating it.
    pub fn publish_model(&self, model: AuthorizationModel) -> DomainResult<u64> {
        self.models.publish(model)
    }

    pub fn activate_model(&self, version_id: u64) -> DomainResult<()> {
        self.models.activate(version_id)
    }

    pub fn publish_and_activate_model(&self, model: AuthorizationModel) -> DomainResult<u64> {
        self.models.publish_and_activate(model)
    }

    pub fn list_model_versions(&self) -> Vec<ModelVersionSummary> {
        self.models.list_versions()
    }

    // ---- queries ----

    pub async fn check(&self, request: &CheckRequest) -> DomainResult<CheckResult> {
        self.resolver.check(request).await
    }

    pub async fn batch_check(&self, request: BatchCheckRequest) -> BatchCheckResult<BatchCheckResponse> {
        self.batch.check(request).await
    }

    pub async fn list_objects(&self, request: &ListObjectsRequest) -> DomainResult<ListObjectsResult> {
        self.resolver.list_objects(request).await
    }

    pub async fn list_users(&self, request: &ListUsersRequest) -> DomainResult<ListUsersResult> {
        self.resolver.list_users(request).await
    }

    pub async fn expand(&self, request: &ExpandRequest) -> DomainResult<ExpandResult> {
        self.resolver.expand(request).await
    }

    // ---- tuples ----

    /// Applies deletes and writes in one transaction.
    ///
    /// Writes must be assignable under the active model. Deletes are only
    /// parsed, so tuples written under an older model can still be removed.
    #[instrument(skip(self, writes, deletes), fields(writes = writes.len(), deletes = deletes.len()))]
    pub async fn write_tuples(
        &self,
        writes: Vec<TupleKey>,
        deletes: Vec<TupleKey>,
    ) -> DomainResult<WriteResponse> {
        if writes.is_empty() && deletes.is_empty() {
            return Err(DomainError::InvalidRequest {
                message: "write must contain at least one tuple".to_string(),
            });
        }
        let model = self.models.get_active_model().await?;

        let writes = writes
            .iter()
            .map(|tuple| {
                model.validate_tuple(tuple)?;
                to_stored(tuple)
            })
            .collect::<DomainResult<Vec<_>>>()?;
        let deletes = deletes.iter().map(to_stored).collect::<DomainResult<Vec<_>>>()?;

        let outcome = self
            .store
            .write(writes, deletes)
            .await
            .map_err(map_write_error)?;

        Ok(WriteResponse {
            consistency_token: ConsistencyToken::new(outcome.txid, model.version_id).encode()?,
            written: outcome.written,
            deleted: outcome.deleted,
        })
    }

    /// Reads tuples matching `filter` at the token's snapshot, or the latest.
    pub async fn read_tuples(
        &self,
        filter: &TupleFilter,
        consistency_token: Option<&str>,
    ) -> DomainResult<ReadResponse> {
        let token = match consistency_token {
            Some(encoded) => ConsistencyToken::decode(encoded)?,
            None => {
                let txid = self.store.watermark().await.map_err(map_storage_error)?;
                ConsistencyToken::new(txid, self.models.active_version().unwrap_or_default())
            }
        };

        let tuples = self
            .store
            .read_tuples(filter, token.txid)
            .await
            .map_err(map_read_error)?;

        Ok(ReadResponse {
            tuples: tuples.into_iter().map(to_tuple_key).collect(),
            consistency_token: token.encode()?,
        })
    }

    /// Drops tombstones older than the configured retention window.
    ///
    /// Without a retention setting every tombstone is kept and this is a
    /// no-op.
    pub async fn compact(&self) -> DomainResult<usize> {
        let Some(retention) = self.retention_txids else {
            return Ok(0);
        };
        let watermark = self.store.watermark().await.map_err(map_storage_error)?;
        self.store
            .compact(watermark.saturating_sub(retention))
            .await
            .map_err(map_storage_error)
    }
}

fn to_stored(tuple: &TupleKey) -> DomainResult<StoredTuple> {
    let (subject, object) = tuple.parse()?;
    let (user_type, user_id, user_relation) = match subject {
        Subject::Object(id) => (id.object_type, id.object_id, None),
        Subject::Userset(userset) => (
            userset.object.object_type,
            userset.object.object_id,
            Some(userset.relation),
        ),
        Subject::Wildcard { user_type } => (user_type, "*".to_string(), None),
    };

    let stored = StoredTuple::new(
        object.object_type,
        object.object_id,
        tuple.relation.as_str(),
        user_type,
        user_id,
        user_relation,
    );
    Ok(match &tuple.condition_name {
        Some(name) => stored.with_condition(name.as_str(), tuple.condition_context.clone()),
        None => stored,
    })
}

fn to_tuple_key(tuple: StoredTuple) -> TupleKey {
    let key = TupleKey::new(
        tuple.user(),
        tuple.relation.as_str(),
        format!("{}:{}", tuple.object_type, tuple.object_id),
    );
    match tuple.condition_name {
        Some(name) => key.with_condition(name, tuple.condition_context),
        None => key,
    }
}

/// Rejected writes are the caller's fault, not a store failure.
fn map_write_error(err: StorageError) -> DomainError {
    match err {
        StorageError::InvalidInput { .. } | StorageError::ConditionConflict(_) => {
            DomainError::InvalidRequest {
                message: err.to_string(),
            }
        }
        other => map_storage_error(other),
    }
}

fn map_read_error(err: StorageError) -> DomainError {
    match err {
        StorageError::InvalidFilter { .. } => DomainError::InvalidRequest {
            message: err.to_string(),
        },
        other => map_storage_error(other),
    }
}
