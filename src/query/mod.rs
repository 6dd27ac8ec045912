//! Watchable remote queries.
//!
//! One concrete type per remote resource kind. The rest of the engine only
//! depends on the [`Query`] capability set: `fetch`, `stop`, `can_share`
//! plus the identity used for deduplication.

mod catalog_nodes;
mod catalog_service;
mod catalog_services;
mod data;
mod key;
mod kv_get;
mod kv_keys;
mod kv_list;
mod options;
mod secret;
mod secret_list;
mod secret_read;

pub use catalog_nodes::*;
pub use catalog_service::*;
pub use catalog_services::*;
pub use data::*;
pub use key::*;
pub use kv_get::*;
pub use kv_keys::*;
pub use kv_list::*;
pub use options::*;
pub use secret::*;
pub use secret_list::*;
pub use secret_read::*;

#[cfg(test)]
mod catalog_test;
#[cfg(test)]
mod kv_test;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ClientSet;
use crate::QueryError;
use crate::Result;

/// A unit of remote state that can be fetched repeatedly.
///
/// `fetch` is called with the change token observed by the caller and
/// returns the current data together with the new token. Implementations
/// must make `stop` idempotent, interrupt any in-flight `fetch`, and fail
/// every later `fetch` with [`QueryError::Stopped`].
#[async_trait]
pub trait Query: Send + Sync + 'static {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)>;

    fn stop(&self);

    /// Normalized identity; equal keys denote the same remote resource
    fn key(&self) -> QueryKey;

    fn kind(&self) -> QueryKind {
        self.key().kind()
    }

    /// Whether consumers (and cooperating instances) may share one fetch loop
    fn can_share(&self) -> bool {
        self.kind().can_share()
    }
}

/// Runs `fut` unless `stop` fires first.
pub(crate) async fn until_stopped<T>(
    stop: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if stop.is_cancelled() {
        return Err(QueryError::Stopped.into());
    }
    tokio::select! {
        biased;
        _ = stop.cancelled() => Err(QueryError::Stopped.into()),
        r = fut => r,
    }
}

/// Interruptible sleep; fails with `Stopped` when interrupted.
pub(crate) async fn sleep_until_stopped(
    stop: &CancellationToken,
    delay: Duration,
) -> Result<()> {
    if stop.is_cancelled() {
        return Err(QueryError::Stopped.into());
    }
    tokio::select! {
        biased;
        _ = stop.cancelled() => Err(QueryError::Stopped.into()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Trims whitespace and surrounding slashes.
pub(crate) fn normalize_path(s: &str) -> String {
    s.trim().trim_matches('/').to_string()
}
