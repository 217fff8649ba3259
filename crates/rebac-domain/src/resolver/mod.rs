//! Graph resolver: check, list and expand over a tuple snapshot.
//!
//! The resolver reads tuples through [`TupleReader`] and models through
//! [`ModelReader`]; it never writes to either.

mod config;
mod context;
mod expand;
mod graph_resolver;
mod list;
mod token;
mod traits;
mod types;

#[cfg(test)]
mod tests;

pub use config::{ListConfig, ListStrategy, ResolverConfig};
pub use graph_resolver::{CacheMetrics, CacheMetricsSnapshot, GraphResolver};
pub use token::{ConsistencyToken, PageToken};
pub use traits::{ModelReader, SubjectFilter, TupleReader};
pub use types::{
    CheckRequest, CheckResult, ExpandNode, ExpandRequest, ExpandResult, ListObjectsRequest,
    ListObjectsResult, ListUsersRequest, ListUsersResult, NodeType, ResolutionNode,
    ReverseTupleRef, StoredTupleRef, UserResult,
};
