//! Error types for kith-graph.

use thiserror::Error;

/// Result type for kith-graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while constructing graph values.
///
/// Store merges never fail; these only surface from parsing helpers.
#[derive(Debug, Error)]
pub enum Error {
    /// An identity key was empty.
    #[error("identity key must not be empty")]
    EmptyIdentity,

    /// Profile metadata was not valid JSON.
    #[error("invalid profile metadata: {0}")]
    InvalidProfile(#[source] serde_json::Error),
}
