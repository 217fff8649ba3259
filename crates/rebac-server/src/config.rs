//! Configuration management for the authorization service.
//!
//! Configuration is layered from three sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over file values, which take
//! precedence over defaults. Variables use the `REBAC_` prefix and `__` as
//! the nesting separator, e.g. `REBAC_RESOLVER__MAX_DEPTH=40`.
//!
//! # Example
//!
//! ```ignore
//! use rebac_server::config::ServiceConfig;
//!
//! let config = ServiceConfig::load("rebac.yaml")?;
//! let resolver = config.resolver_config();
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use rebac_domain::resolver::{ListConfig, ListStrategy, ResolverConfig};
use rebac_domain::{DecisionCache, DecisionCacheConfig};
use serde::{Deserialize, Serialize};

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub resolver: ResolverSettings,

    #[serde(default)]
    pub list: ListSettings,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Recursion and deadline limits shared by every engine call.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolverSettings {
    /// Relation hops allowed before a call fails with a depth error.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Per-call deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_max_depth() -> u32 {
    25
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// ListObjects / ListUsers settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ListSettings {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Candidate checks run concurrently within one list call.
    #[serde(default = "default_list_concurrency")]
    pub concurrency: usize,

    /// Types with at most this many objects are listed exhaustively.
    #[serde(default = "default_small_universe_threshold")]
    pub small_universe_threshold: usize,

    #[serde(default)]
    pub strategy: ListStrategy,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            concurrency: default_list_concurrency(),
            small_universe_threshold: default_small_universe_threshold(),
            strategy: ListStrategy::Auto,
        }
    }
}

fn default_max_candidates() -> usize {
    1000
}

fn default_page_size() -> u32 {
    100
}

fn default_max_page_size() -> u32 {
    1000
}

fn default_list_concurrency() -> usize {
    50
}

fn default_small_universe_threshold() -> usize {
    64
}

/// Batch check settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BatchSettings {
    #[serde(default = "default_batch_max_items")]
    pub max_items: usize,

    /// Unique checks executed concurrently within one batch.
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_items: default_batch_max_items(),
            concurrency: default_batch_concurrency(),
        }
    }
}

fn default_batch_max_items() -> usize {
    50
}

fn default_batch_concurrency() -> usize {
    10
}

/// Decision cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_capacity() -> u64 {
    100_000
}

fn default_cache_ttl() -> u64 {
    60
}

/// Tuple storage settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type. Only "memory" is available.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Transactions kept behind the watermark when compacting tombstones.
    /// `None` keeps every tombstone.
    #[serde(default)]
    pub retention_txids: Option<u64>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            retention_txids: None,
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServiceConfig {
    /// Loads a YAML file with `REBAC_` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServiceConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let loaded: ServiceConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Defaults with `REBAC_` environment overrides.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServiceConfig::default())?)
            .add_source(env_source())
            .build()?;

        let loaded: ServiceConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects values no engine can run with.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let invalid = |message: String| Err(ConfigLoadError::Invalid { message });

        if self.resolver.max_depth == 0 {
            return invalid("resolver.max_depth must be greater than 0".to_string());
        }
        if self.resolver.timeout_ms == 0 {
            return invalid("resolver.timeout_ms must be greater than 0".to_string());
        }
        if self.list.max_candidates == 0 {
            return invalid("list.max_candidates must be greater than 0".to_string());
        }
        if self.list.concurrency == 0 {
            return invalid("list.concurrency must be greater than 0".to_string());
        }
        if self.list.default_page_size == 0 || self.list.default_page_size > self.list.max_page_size {
            return invalid(format!(
                "list.default_page_size must be between 1 and list.max_page_size ({}), got: {}",
                self.list.max_page_size, self.list.default_page_size
            ));
        }
        if self.batch.max_items == 0 {
            return invalid("batch.max_items must be greater than 0".to_string());
        }
        if self.batch.concurrency == 0 {
            return invalid("batch.concurrency must be greater than 0".to_string());
        }
        if self.cache.enabled && self.cache.max_capacity == 0 {
            return invalid("cache.max_capacity must be greater than 0 when enabled".to_string());
        }

        let valid_backends = ["memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return invalid(format!(
                "storage.backend must be one of: {:?}, got: {}",
                valid_backends, self.storage.backend
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            ));
        }

        Ok(())
    }

    pub fn list_config(&self) -> ListConfig {
        ListConfig {
            max_candidates: self.list.max_candidates,
            default_page_size: self.list.default_page_size,
            max_page_size: self.list.max_page_size,
            concurrency: self.list.concurrency,
            small_universe_threshold: self.list.small_universe_threshold,
            strategy: self.list.strategy,
        }
    }

    pub fn cache_config(&self) -> DecisionCacheConfig {
        DecisionCacheConfig::default()
            .with_enabled(self.cache.enabled)
            .with_max_capacity(self.cache.max_capacity)
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
    }

    /// Resolver configuration, with a decision cache attached when enabled.
    pub fn resolver_config(&self) -> ResolverConfig {
        let config = ResolverConfig::default()
            .with_max_depth(self.resolver.max_depth)
            .with_timeout(Duration::from_millis(self.resolver.timeout_ms))
            .with_list_config(self.list_config());
        if self.cache.enabled {
            config.with_cache(Arc::new(DecisionCache::new(self.cache_config())))
        } else {
            config
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("REBAC")
        .prefix_separator("_")
        .separator("__")
}
