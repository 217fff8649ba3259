//! Tests for the graph resolver module.
//!
//! Organized by functionality:
//! - Check: direct, computed, tuple-to-userset, boolean operators
//! - Safety features (depth limiting, cycle detection, timeouts)
//! - Contextual tuples and consistency tokens
//! - ListObjects / ListUsers
//! - Expand


#[cfg(test)]
mod list_tests;
