//! Authorization model types and the versioned model store.
//!
//! This module contains:
//! - Identifiers (`TypedId`, `UsersetRef`, `Subject`) and their wire forms
//! - Rewrite trees, relation and type definitions
//! - The model store holding immutable published versions

mod store;
mod types;
#[cfg(test)]
mod types_proptest;

pub use store::{ModelStore, ModelVersionSummary};
pub use types::*;
