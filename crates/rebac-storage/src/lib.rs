//! rebac-storage: Tuple storage
//!
//! This crate provides the relationship tuple store, including:
//! - TupleStore trait with transaction-id snapshots
//! - In-memory implementation with forward and reverse indexes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rebac-storage                  │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - TupleStore trait, records    │
//! │  memory.rs   - In-memory implementation     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use error::{ConditionConflictError, StorageError, StorageResult};
pub use memory::MemoryTupleStore;
pub use traits::{
    parse_user_filter, validate_tuple, StoredTuple, TupleFilter, TupleIdentity, TupleRecord,
    TupleStore, WriteOutcome,
};
