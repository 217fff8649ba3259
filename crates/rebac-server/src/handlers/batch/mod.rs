//! Batch check handler with two-stage deduplication.
//!
//! A batch runs many independent checks against one snapshot:
//!
//! 1. **Intra-batch deduplication**: identical items execute once
//! 2. **Singleflight**: concurrent batches asking the same question share
//!    one evaluation
//!
//! Items carrying contextual tuples skip both stages. A failing item is
//! reported in its own slot with an error kind and message; the rest of the
//! batch is unaffected.

mod handler;
mod singleflight;
mod types;

pub use handler::{BatchCheckHandler, DEFAULT_CONCURRENCY};
pub use types::{
    BatchCheckError, BatchCheckItem, BatchCheckItemResult, BatchCheckRequest, BatchCheckResponse,
    BatchCheckResult, BatchItemError, MAX_BATCH_SIZE,
};
