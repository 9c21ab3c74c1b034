//! Error types for kith-session.

use std::time::Duration;

use thiserror::Error;

/// Result type for kith-session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session and its pipelines.
///
/// Node-level failures (one profile, one note, one score) are absorbed
/// and logged inside the pipelines; only identity-level failures reach
/// callers as an `Error`.
#[derive(Debug, Error)]
pub enum Error {
    /// No transport is available. Shown as a sticky banner; the graph is kept.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A fetch did not answer in time.
    #[error("fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The remote collaborator rejected or failed the request.
    #[error("source error: {0}")]
    Source(String),

    /// The operation needs an authenticated session.
    #[error("no active session")]
    NoSession,

    /// The session this work belonged to has since been replaced.
    #[error("session was superseded")]
    StaleSession,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleSession)
    }
}

impl From<kith_graph::Error> for Error {
    fn from(e: kith_graph::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
