//! Configuration for the graph resolver.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DecisionCache;

/// Configuration for the graph resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum depth for graph traversal.
    pub max_depth: u32,
    /// Default deadline for a call when the request carries none.
    pub timeout: Duration,
    /// Optional cache of top-level decisions.
    ///
    /// Skipped when contextual tuples are provided or a trace is requested.
    pub cache: Option<Arc<DecisionCache>>,
    /// Settings for ListObjects and ListUsers.
    pub list: ListConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            timeout: Duration::from_secs(30),
            cache: None,
            list: ListConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn with_cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_list_config(mut self, list: ListConfig) -> Self {
        self.list = list;
        self
    }
}

/// How ListObjects generates candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStrategy {
    /// Exhaustive for small object universes, reverse index otherwise.
    #[default]
    Auto,
    /// Walk the reverse index outward from the user.
    ReverseIndex,
    /// Check every object of the requested type.
    Exhaustive,
}

/// Bounds for ListObjects and ListUsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListConfig {
    /// Maximum candidates confirmed per call; hitting it marks the result truncated.
    pub max_candidates: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Candidates confirmed concurrently.
    pub concurrency: usize,
    /// `Auto` uses exhaustive iteration at or below this many objects.
    pub small_universe_threshold: usize,
    pub strategy: ListStrategy,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            max_candidates: 1000,
            default_page_size: 100,
            max_page_size: 1000,
            concurrency: 50,
            small_universe_threshold: 64,
            strategy: ListStrategy::Auto,
        }
    }
}

impl ListConfig {
    /// Effective page size for a request.
    pub fn page_size(&self, requested: Option<u32>) -> usize {
        let size = requested
            .filter(|s| *s > 0)
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        size.max(1) as usize
    }
}
