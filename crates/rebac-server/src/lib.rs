//! rebac-server: Transport-agnostic authorization service
//!
//! This crate wires the domain engines to a tuple store:
//! - `AuthorizationService` with check, batch check, list and expand
//! - Model publish/activate and tuple write/read helpers
//! - Batch check handler with deduplication
//! - Storage to domain adapter
//! - Configuration and logging setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rebac-server                   │
//! ├─────────────────────────────────────────────┤
//! │  service.rs       - AuthorizationService    │
//! │  handlers/batch/  - Batch checks            │
//! │  adapters.rs      - TupleStore -> Reader    │
//! │  config.rs        - Configuration           │
//! │  observability.rs - Logging                 │
//! └─────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod observability;
pub mod service;

// Re-exports for convenience
pub use adapters::StoreTupleReader;
pub use config::{ConfigLoadError, LoggingConfig, ServiceConfig};
pub use handlers::batch::{
    BatchCheckError, BatchCheckHandler, BatchCheckItem, BatchCheckItemResult, BatchCheckRequest,
    BatchCheckResponse,
};
pub use observability::init_logging;
pub use service::{AuthorizationService, ReadResponse, WriteResponse};
