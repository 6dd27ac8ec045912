//! Remote store capability.
//!
//! The engine treats the remote store as a capability: a long-poll read keyed
//! by a change index, a session/lock primitive with store-enforced expiry, and
//! catalog listings. Secrets come from a separate backend. `MemStore` is the
//! in-memory adaptor used by tests and embedders without a network store.

mod mem_store;
mod types;
pub use mem_store::*;
pub use types::*;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::QueryOptions;
use crate::ResponseMetadata;
use crate::Result;
use crate::Secret;
use crate::StoreError;

/// KV, catalog and session/lock operations of the remote store.
///
/// Reads honour `QueryOptions::wait_index`: when it matches the current index
/// the call blocks up to `wait_time` waiting for a change.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<KvPair>, ResponseMetadata)>;

    async fn list(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<KvPair>, ResponseMetadata)>;

    async fn keys(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<String>, ResponseMetadata)>;

    /// Returns the index of the write
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<u64>;

    async fn delete(
        &self,
        key: &str,
    ) -> Result<()>;

    /// Writes `value` only while `lock` is held by `session`, checked
    /// atomically with the write. Returns `false` and writes nothing otherwise.
    async fn put_if_held(
        &self,
        key: &str,
        value: Vec<u8>,
        lock: &str,
        session: &str,
    ) -> Result<bool>;

    async fn catalog_services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(Vec<CatalogService>, ResponseMetadata)>;

    async fn catalog_service(
        &self,
        name: &str,
        tag: Option<String>,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceInstance>, ResponseMetadata)>;

    async fn catalog_nodes(
        &self,
        opts: &QueryOptions,
    ) -> Result<(Vec<Node>, ResponseMetadata)>;

    /// Creates a session that the store invalidates after `ttl` without renewal
    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<String>;

    /// Fails with `StoreError::SessionNotFound` once the session is gone
    async fn renew_session(
        &self,
        session: &str,
    ) -> Result<()>;

    async fn destroy_session(
        &self,
        session: &str,
    ) -> Result<()>;

    /// Succeeds for at most one live session per key
    async fn acquire_lock(
        &self,
        key: &str,
        session: &str,
    ) -> Result<bool>;

    async fn release_lock(
        &self,
        key: &str,
        session: &str,
    ) -> Result<bool>;
}

/// Secret backend (Vault style). Reads never block server-side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// `None` when nothing exists at `path`
    async fn read(
        &self,
        path: &str,
    ) -> Result<Option<Secret>>;

    async fn list(
        &self,
        path: &str,
    ) -> Result<Option<Secret>>;
}

/// Clients a query may fetch from
#[derive(Clone)]
pub struct ClientSet {
    store: Arc<dyn RemoteStore>,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl ClientSet {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store, secrets: None }
    }

    pub fn with_secrets(
        mut self,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    pub fn secrets(&self) -> Result<&dyn SecretStore> {
        self.secrets
            .as_deref()
            .ok_or_else(|| StoreError::MissingClient("secret").into())
    }
}

impl std::fmt::Debug for ClientSet {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClientSet")
            .field("secrets", &self.secrets.is_some())
            .finish_non_exhaustive()
    }
}
