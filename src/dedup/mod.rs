//! Cross-process query deduplication.
//!
//! Cooperating instances elect one leader per shareable query through the
//! remote store's session/lock primitive. The leader performs the real fetch
//! and publishes a generation-tagged payload on a shared path; followers
//! long-poll that path instead of the original resource. Generations fence
//! out late writes from a demoted leader.

mod lease;
mod payload;
mod query;

pub use lease::*;
pub use payload::*;
pub use query::*;


use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::async_task::join_task;
use crate::constants::DEDUP_DATA_LEAF;
use crate::constants::DEDUP_LOCK_LEAF;
use crate::BackoffPolicy;
use crate::ClientSet;
use crate::DedupConfig;
use crate::DedupError;
use crate::QueryData;
use crate::QueryKey;
use crate::Result;

struct LeaseHandle {
    entry: Arc<watch::Sender<LeaseEntry>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Lease table and publisher shared by every dedup-wrapped query of one
/// instance
pub struct DedupCoordinator {
    clients: ClientSet,
    config: DedupConfig,
    retry: BackoffPolicy,
    instance: String,
    leases: DashMap<QueryKey, LeaseHandle>,
    /// Released keepers still tearing down their lock and session
    retiring: Mutex<Vec<(QueryKey, JoinHandle<()>)>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DedupCoordinator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DedupCoordinator")
            .field("instance", &self.instance)
            .field("prefix", &self.config.prefix)
            .field("leases", &self.leases.len())
            .finish()
    }
}

impl DedupCoordinator {
    pub fn new(
        clients: ClientSet,
        config: DedupConfig,
        retry: BackoffPolicy,
    ) -> Self {
        let instance = config
            .instance_name
            .clone()
            .unwrap_or_else(|| format!("mirror-{}", nanoid::nanoid!(8)));
        Self {
            clients,
            config,
            retry,
            instance,
            leases: DashMap::new(),
            retiring: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    fn path(
        &self,
        key: &QueryKey,
        leaf: &str,
    ) -> String {
        format!("{}/{}/{}", self.config.normalized_prefix(), escape_key(key), leaf)
    }

    pub fn lock_path(
        &self,
        key: &QueryKey,
    ) -> String {
        self.path(key, DEDUP_LOCK_LEAF)
    }

    pub fn data_path(
        &self,
        key: &QueryKey,
    ) -> String {
        self.path(key, DEDUP_DATA_LEAF)
    }

    /// Starts competing for `key` and returns its role feed. Reuses the
    /// running keeper when the key is already tracked.
    pub(crate) fn acquire(
        &self,
        key: &QueryKey,
    ) -> Result<watch::Receiver<LeaseEntry>> {
        if self.cancel.is_cancelled() {
            return Err(DedupError::Stopped.into());
        }

        let handle = self.leases.entry(key.clone()).or_insert_with(|| {
            let (entry, _) = watch::channel(LeaseEntry::default());
            let entry = Arc::new(entry);
            let cancel = self.cancel.child_token();
            let keeper = LeaseKeeper {
                key: key.clone(),
                lock_path: self.lock_path(key),
                data_path: self.data_path(key),
                instance: self.instance.clone(),
                ttl: self.config.ttl(),
                interval: self.config.renew_interval(),
                retry: self.retry,
                clients: self.clients.clone(),
                entry: entry.clone(),
                cancel: cancel.clone(),
            };
            debug!(query = %key, "starting lease keeper");
            let task = tokio::spawn(keeper.run());
            LeaseHandle { entry, cancel, task }
        });
        Ok(handle.entry.subscribe())
    }

    /// Stops competing for `key`. A held lock is released in the background;
    /// [`Self::stop`] waits for it.
    pub(crate) fn release(
        &self,
        key: &QueryKey,
    ) {
        if let Some((_, handle)) = self.leases.remove(key) {
            debug!(query = %key, "releasing lease");
            handle.cancel.cancel();
            let mut retiring = self.retiring.lock();
            retiring.retain(|(_, task)| !task.is_finished());
            retiring.push((key.clone(), handle.task));
        }
    }

    pub fn lease(
        &self,
        key: &QueryKey,
    ) -> Option<LeaseEntry> {
        self.leases.get(key).map(|h| h.entry.borrow().clone())
    }

    pub fn is_leader(
        &self,
        key: &QueryKey,
    ) -> bool {
        self.lease(key).map(|e| e.state.is_leader()).unwrap_or(false)
    }

    /// Writes `data` under the next generation of the current term. Only the
    /// lock holder may publish; the store re-checks ownership atomically with
    /// the write, and a rejected write demotes this instance.
    #[instrument(skip_all, fields(query = %key))]
    pub async fn publish(
        &self,
        key: &QueryKey,
        data: &QueryData,
    ) -> Result<u64> {
        let not_leader = || DedupError::NotLeader { key: key.clone() };
        let (entry, session, epoch, generation) = {
            let handle = self.leases.get(key).ok_or_else(not_leader)?;
            let current = handle.entry.borrow().clone();
            if !current.state.is_leader() {
                return Err(not_leader().into());
            }
            let session = current.session.ok_or_else(not_leader)?;
            (handle.entry.clone(), session, current.epoch, current.generation + 1)
        };

        let payload = DedupPayload {
            epoch,
            generation,
            leader: self.instance.clone(),
            data: data.clone(),
        };
        let written = self
            .clients
            .store()
            .put_if_held(&self.data_path(key), payload.encode()?, &self.lock_path(key), &session)
            .await?;
        if !written {
            warn!(session = %session, "store rejected publish, lock no longer held");
            entry.send_if_modified(|e| {
                if e.session.as_deref() != Some(session.as_str()) || !e.state.is_leader() {
                    return false;
                }
                e.state = LeaseState::Lost;
                true
            });
            return Err(not_leader().into());
        }

        entry.send_modify(|e| e.generation = e.generation.max(generation));
        debug!(epoch, generation, "published dedup payload");
        Ok(generation)
    }

    /// Records a payload seen on the shared path. Returns `true` when it is
    /// ahead of anything seen for the key so far, ordered by term first and
    /// generation second.
    pub(crate) fn observe(
        &self,
        key: &QueryKey,
        payload: &DedupPayload,
    ) -> bool {
        let Some(handle) = self.leases.get(key) else {
            return false;
        };
        handle.entry.send_if_modified(|e| {
            if payload.fence() <= (e.epoch, e.generation) {
                return false;
            }
            e.epoch = payload.epoch;
            e.generation = payload.generation;
            e.leader = Some(payload.leader.clone());
            true
        })
    }

    /// Signals every keeper to release its lock without waiting for it.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.leases.clear();
    }

    /// Stops every keeper and waits until their locks and sessions are
    /// released.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let keys: Vec<QueryKey> = self.leases.iter().map(|e| e.key().clone()).collect();
        let mut tasks = std::mem::take(&mut *self.retiring.lock());
        for key in keys {
            if let Some((_, handle)) = self.leases.remove(&key) {
                handle.cancel.cancel();
                tasks.push((key, handle.task));
            }
        }
        for (key, task) in tasks {
            if let Err(e) = join_task(task).await {
                debug!(query = %key, "lease keeper ended abnormally: {e}");
            }
        }
    }
}
