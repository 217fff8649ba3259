//! rebac-domain: Core authorization domain logic
//!
//! This crate contains the core authorization logic including:
//! - Identifiers, rewrite trees and the versioned model store
//! - Model validation
//! - Graph resolver for check, list and expand
//! - Decision caching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                rebac-domain                  │
//! ├─────────────────────────────────────────────┤
//! │  model/      - Types & model store          │
//! │  resolver/   - Graph resolution engine      │
//! │  cache/      - Decision caching             │
//! │  validation/ - Model validation             │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod model;
pub mod resolver;
pub mod validation;

// Re-export commonly used types at the crate root
pub use cache::{DecisionCache, DecisionCacheConfig, DecisionKey};
pub use error::{DomainError, DomainResult, ErrorKind};
