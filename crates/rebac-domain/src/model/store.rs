//! Versioned, in-process model store.
//!
//! Published versions are immutable and shared as `Arc<AuthorizationModel>`.
//! The active version is a single snapshot reference swapped atomically, so a
//! reader holding the previous `Arc` keeps evaluating against it undisturbed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DomainError, DomainResult};
use crate::resolver::ModelReader;
use crate::validation::validate_model;

use super::AuthorizationModel;

/// Listing entry for a published model version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersionSummary {
    pub version_id: u64,
    pub id: String,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub is_active: bool,
}

/// Holds every published model version and the active one.
#[derive(Debug, Default)]
pub struct ModelStore {
    versions: RwLock<BTreeMap<u64, Arc<AuthorizationModel>>>,
    active: RwLock<Option<Arc<AuthorizationModel>>>,
    last_version: AtomicU64,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and publishes a model, returning its new version id.
    ///
    /// The version is not activated.
    pub fn publish(&self, mut model: AuthorizationModel) -> DomainResult<u64> {
        validate_model(&model).map_err(|errors| DomainError::ModelValidation {
            message: errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        })?;

        let version_id = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        model.version_id = version_id;
        if model.id.is_empty() {
            model.id = format!("model-{version_id}");
        }
        model.created_at = Utc::now();

        info!(version_id, model_id = %model.id, types = model.types.len(), "published authorization model");
        self.versions.write().insert(version_id, Arc::new(model));
        Ok(version_id)
    }

    /// Makes a published version the active one.
    pub fn activate(&self, version_id: u64) -> DomainResult<()> {
        let model = self.lookup(version_id)?;
        *self.active.write() = Some(model);
        info!(version_id, "activated authorization model");
        Ok(())
    }

    /// Publishes and immediately activates a model.
    pub fn publish_and_activate(&self, model: AuthorizationModel) -> DomainResult<u64> {
        let version_id = self.publish(model)?;
        self.activate(version_id)?;
        Ok(version_id)
    }

    /// Returns the active version id, if any.
    pub fn active_version(&self) -> Option<u64> {
        self.active.read().as_ref().map(|m| m.version_id)
    }

    /// Lists published versions, oldest first.
    pub fn list_versions(&self) -> Vec<ModelVersionSummary> {
        let active = self.active_version();
        self.versions
            .read()
            .values()
            .map(|m| ModelVersionSummary {
                version_id: m.version_id,
                id: m.id.clone(),
                schema_version: m.schema_version.clone(),
                created_at: m.created_at,
                notes: m.notes.clone(),
                is_active: Some(m.version_id) == active,
            })
            .collect()
    }

    fn lookup(&self, version_id: u64) -> DomainResult<Arc<AuthorizationModel>> {
        self.versions
            .read()
            .get(&version_id)
            .cloned()
            .ok_or(DomainError::ModelVersionNotFound { version_id })
    }
}

#[async_trait]
impl ModelReader for ModelStore {
    async fn get_active_model(&self) -> DomainResult<Arc<AuthorizationModel>> {
        self.active.read().clone().ok_or(DomainError::NoActiveModel)
    }

    async fn get_model(&self, version_id: u64) -> DomainResult<Arc<AuthorizationModel>> {
        self.lookup(version_id)
    }
}
