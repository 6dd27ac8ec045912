//! Mirror Engine Error Hierarchy
//!
//! Errors are grouped by the layer that produces them: the remote store
//! transport, individual queries, the cross-process dedup protocol and
//! configuration loading.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::QueryKey;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (remote store, serialization, tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Query construction and fetch failures
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Cross-process deduplication failures
    #[error(transparent)]
    Dedup(#[from] DedupError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Cooperative cancellation. Never reported upward as a failure.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Query(QueryError::Stopped) | Error::Dedup(DedupError::Stopped))
    }

    /// The remote store answered with data the query cannot interpret.
    /// Retrying reproduces the same response, so callers treat it as terminal.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::Query(QueryError::UnexpectedResponse { .. })
                | Error::Query(QueryError::InvalidFormat { .. })
                | Error::System(SystemError::Serialization(_))
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Remote store transport layer
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    /// Payload encoding/decoding
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Endpoint unavailable (HTTP 503 equivalent)
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Request did not complete in time
    #[error("Remote store request timed out after {0:?}")]
    Timeout(Duration),

    /// Session unknown to the store (expired, destroyed or never created)
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// The backend required for this request was not configured
    #[error("No {0} client configured")]
    MissingClient(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The query was stopped; every later fetch fails with this error
    #[error("Query stopped")]
    Stopped,

    /// Query input could not be normalized
    #[error("{kind}: invalid format: {input:?}")]
    InvalidFormat { kind: &'static str, input: String },

    /// The store answered with a shape the query cannot parse
    #[error("{query}: unexpected response: {reason}")]
    UnexpectedResponse { query: String, reason: String },

    /// Retry ceiling reached; carries the last transient error
    #[error("{query}: giving up after {attempts} attempts: {last}")]
    RetryExhausted {
        query: QueryKey,
        attempts: usize,
        last: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    /// Publish attempted without holding the lock for the key
    #[error("Not the dedup leader for {key}")]
    NotLeader { key: QueryKey },

    /// The session backing the lock is gone
    #[error("Dedup session {session} lost")]
    SessionLost { session: String },

    /// The dedup coordinator was stopped
    #[error("Dedup coordinator stopped")]
    Stopped,
}

// ============== Conversion Implementations ============== //
impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::System(SystemError::Store(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        SerializationError::Bincode(e).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(err))
    }
}
