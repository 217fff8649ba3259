//! Decision cache for top-level check results.
//!
//! Keys pin the model version and the tuple snapshot (transaction id) a
//! decision was computed at. Both are immutable, so an entry can never go
//! stale and writes need no invalidation: a newer snapshot is simply a
//! different key. Entries age out through TTL and capacity eviction.
//!
//! Caching is disabled by default. The resolver bypasses it for requests
//! carrying contextual tuples or asking for a trace.
//!
//! # Example
//!
//! ```rust,ignore
//! use rebac_domain::cache::{DecisionCache, DecisionCacheConfig, DecisionKey};
//!
//! let cache = DecisionCache::new(DecisionCacheConfig::default().with_enabled(true));
//! let key = DecisionKey::new(3, "user:alice", "viewer", "document:1", 42);
//! cache.insert(key.clone(), true).await;
//! assert_eq!(cache.get(&key).await, Some(true));
//! ```

use std::time::Duration;

use moka::future::Cache;

/// Configuration for the decision cache.
#[derive(Debug, Clone)]
pub struct DecisionCacheConfig {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// Maximum number of entries.
    pub max_capacity: u64,
    /// Time-to-live per entry.
    pub ttl: Duration,
}

impl Default for DecisionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: 100_000,
            ttl: Duration::from_secs(60),
        }
    }
}

impl DecisionCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Cache key: `(model_version, user, relation, object, txid)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub model_version: u64,
    pub user: String,
    pub relation: String,
    pub object: String,
    pub txid: u64,
}

impl DecisionKey {
    pub fn new(
        model_version: u64,
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
        txid: u64,
    ) -> Self {
        Self {
            model_version,
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
            txid,
        }
    }
}

/// Async, bounded cache of check decisions.
pub struct DecisionCache {
    cache: Cache<DecisionKey, bool>,
    config: DecisionCacheConfig,
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl DecisionCache {
    pub fn new(config: DecisionCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .build();
        Self { cache, config }
    }

    pub fn config(&self) -> &DecisionCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Stores a decision. No-op when the cache is disabled.
    pub async fn insert(&self, key: DecisionKey, allowed: bool) {
        if !self.config.enabled {
            return;
        }
        self.cache.insert(key, allowed).await;
    }

    /// Looks up a decision. Always a miss when the cache is disabled.
    pub async fn get(&self, key: &DecisionKey) -> Option<bool> {
        if !self.config.enabled {
            return None;
        }
        let result = self.cache.get(key).await;
        if result.is_some() {
            metrics::counter!("rebac_decision_cache_hits_total").increment(1);
        } else {
            metrics::counter!("rebac_decision_cache_misses_total").increment(1);
        }
        result
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries. Eviction is lazy, so call
    /// [`run_pending_tasks`](Self::run_pending_tasks) first for an exact count.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}
