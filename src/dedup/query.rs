use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::DedupCoordinator;
use super::DedupPayload;
use super::LeaseEntry;
use crate::ClientSet;
use crate::DedupError;
use crate::Error;
use crate::Query;
use crate::QueryData;
use crate::QueryError;
use crate::QueryKey;
use crate::QueryOptions;
use crate::ResponseMetadata;
use crate::Result;

/// Wraps a shareable query so only the elected instance fetches it.
///
/// The change token seen by the caller is the dedup generation, not the
/// inner query's index. As leader the wrapper fetches for real and publishes
/// each change; as follower it long-polls the shared data path and accepts
/// only newer generations. A role change interrupts the current wait.
pub struct DedupQuery {
    inner: Arc<dyn Query>,
    key: QueryKey,
    coordinator: Arc<DedupCoordinator>,
    role: Mutex<watch::Receiver<LeaseEntry>>,
    leading: AtomicBool,
    /// Last index of the inner query while leading
    inner_index: Mutex<u64>,
    /// Last index of the shared data path while following
    data_index: Mutex<u64>,
    stop: CancellationToken,
}

impl std::fmt::Debug for DedupQuery {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DedupQuery")
            .field("key", &self.key)
            .field("leading", &self.leading.load(Ordering::Relaxed))
            .finish()
    }
}

enum Role {
    Leader,
    Follower,
}

impl DedupQuery {
    pub fn new(
        inner: Arc<dyn Query>,
        coordinator: Arc<DedupCoordinator>,
    ) -> Result<Self> {
        let key = inner.key();
        let role = coordinator.acquire(&key)?;
        Ok(Self {
            inner,
            key,
            coordinator,
            role: Mutex::new(role),
            leading: AtomicBool::new(false),
            inner_index: Mutex::new(0),
            data_index: Mutex::new(0),
            stop: CancellationToken::new(),
        })
    }

    pub fn is_leading(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    fn current_role(&self) -> (Role, watch::Receiver<LeaseEntry>) {
        let mut rx = self.role.lock().clone();
        let leading = rx.borrow_and_update().state.is_leader();
        let was_leading = self.leading.swap(leading, Ordering::SeqCst);
        if leading && !was_leading {
            // fresh leadership: fetch for real before publishing anything
            *self.inner_index.lock() = 0;
        }
        let role = if leading { Role::Leader } else { Role::Follower };
        (role, rx)
    }

    async fn lead(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let inner_wait = *self.inner_index.lock();
        let (data, meta) = self.inner.fetch(clients, opts.with_wait_index(inner_wait)).await?;

        if inner_wait != 0 && meta.last_index == inner_wait {
            trace!(query = %self.key, "leader: no change");
            return Ok((
                data,
                ResponseMetadata {
                    last_index: opts.wait_index,
                    ..meta
                },
            ));
        }

        let generation = self.coordinator.publish(&self.key, &data).await?;
        *self.inner_index.lock() = meta.last_index;
        Ok((
            data,
            ResponseMetadata {
                last_index: generation,
                ..meta
            },
        ))
    }

    async fn follow(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let path = self.coordinator.data_path(&self.key);
        loop {
            let wait = *self.data_index.lock();
            let (pair, meta) = clients.store().get(&path, &opts.with_wait_index(wait)).await?;
            *self.data_index.lock() = meta.last_index;

            let Some(pair) = pair else {
                trace!(query = %self.key, "follower: nothing published yet");
                continue;
            };
            let payload = match DedupPayload::decode(&pair.value) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(query = %self.key, "follower: unreadable payload ignored: {e}");
                    continue;
                }
            };
            if !self.coordinator.observe(&self.key, &payload) {
                debug!(
                    query = %self.key,
                    generation = payload.generation,
                    "follower: ignoring payload from an older generation"
                );
                continue;
            }

            trace!(query = %self.key, generation = payload.generation, leader = %payload.leader, "follower: accepted");
            return Ok((
                payload.data,
                ResponseMetadata {
                    last_index: payload.generation,
                    ..meta
                },
            ));
        }
    }
}

/// Resolves once the leader bit of the lease flips
async fn role_flipped(
    rx: &mut watch::Receiver<LeaseEntry>,
    leading: bool,
) -> Result<()> {
    loop {
        rx.changed().await.map_err(|_| Error::from(DedupError::Stopped))?;
        if rx.borrow().state.is_leader() != leading {
            return Ok(());
        }
    }
}

#[async_trait]
impl Query for DedupQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        loop {
            if self.stop.is_cancelled() {
                return Err(QueryError::Stopped.into());
            }
            let (role, mut rx) = self.current_role();
            let leading = matches!(role, Role::Leader);

            let result = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(QueryError::Stopped.into()),
                flipped = role_flipped(&mut rx, leading) => {
                    flipped?;
                    debug!(query = %self.key, leading = !leading, "dedup role changed");
                    continue;
                }
                r = async {
                    match role {
                        Role::Leader => self.lead(clients, opts).await,
                        Role::Follower => self.follow(clients, opts).await,
                    }
                } => r,
            };

            match result {
                // demoted between the role check and the publish
                Err(Error::Dedup(DedupError::NotLeader { .. })) => continue,
                r => return r,
            }
        }
    }

    fn stop(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.stop.cancel();
        self.inner.stop();
        self.coordinator.release(&self.key);
    }

    fn key(&self) -> QueryKey {
        self.key.clone()
    }

    fn can_share(&self) -> bool {
        self.inner.can_share()
    }
}
