//! In-memory remote store.
//!
//! Every mutation advances a global index. Reads report the index of the data
//! they cover (highest modify index of matching keys, deletion tombstones
//! included), so a blocking read only wakes up for changes that affect it.
//! Sessions expire `ttl` after their last renewal and release their locks.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use super::CatalogService;
use super::KvPair;
use super::Node;
use super::RemoteStore;
use super::SecretStore;
use super::ServiceInstance;
use crate::constants::DEFAULT_BLOCKING_WAIT_MS;
use crate::QueryOptions;
use crate::ResponseMetadata;
use crate::Result;
use crate::Secret;
use crate::StoreError;

#[derive(Debug)]
struct MemSession {
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemState {
    index: u64,

    kv: BTreeMap<String, KvPair>,
    tombstones: BTreeMap<String, u64>,

    services: BTreeMap<String, ServiceInstance>,
    services_index: u64,

    nodes: BTreeMap<String, Node>,
    nodes_index: u64,

    sessions: HashMap<String, MemSession>,
    locks: HashMap<String, String>,

    secrets: BTreeMap<String, Secret>,
}

impl MemState {
    fn purge_expired(
        &mut self,
        now: Instant,
    ) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            debug!(session = %id, "session expired");
            self.drop_session(&id);
        }
    }

    fn drop_session(
        &mut self,
        id: &str,
    ) -> bool {
        let existed = self.sessions.remove(id).is_some();
        self.locks.retain(|_, holder| holder != id);
        existed
    }

    fn prefix_index(
        &self,
        prefix: &str,
    ) -> u64 {
        let live = self
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, p)| p.modify_index)
            .max()
            .unwrap_or(0);
        let deleted = self
            .tombstones
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, i)| *i)
            .max()
            .unwrap_or(0);
        live.max(deleted)
    }

    fn write_kv(
        &mut self,
        key: &str,
        value: Vec<u8>,
        index: u64,
    ) {
        self.tombstones.remove(key);
        let create_index = self.kv.get(key).map(|p| p.create_index).unwrap_or(index);
        self.kv.insert(
            key.to_string(),
            KvPair {
                key: key.to_string(),
                value,
                flags: 0,
                create_index,
                modify_index: index,
            },
        );
    }

    fn with_prefix(
        &self,
        prefix: &str,
    ) -> impl Iterator<Item = &KvPair> {
        let prefix = prefix.to_string();
        self.kv
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .map(|(_, p)| p)
    }
}

/// In-memory implementation of [`RemoteStore`] and [`SecretStore`]
pub struct MemStore {
    state: Mutex<MemState>,
    changes: watch::Sender<u64>,
    last_contact: Mutex<Duration>,
    failures: AtomicUsize,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemStore").field("index", &self.state.lock().index).finish()
    }
}

impl MemStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        // Index 1 is reserved for "nothing written yet", writes start at 2
        Self {
            state: Mutex::new(MemState {
                index: 1,
                ..Default::default()
            }),
            changes,
            last_contact: Mutex::new(Duration::ZERO),
            failures: AtomicUsize::new(0),
        }
    }

    /// Applies a mutation under a fresh index and wakes blocked readers.
    fn commit<T>(
        &self,
        f: impl FnOnce(&mut MemState, u64) -> T,
    ) -> T {
        let (index, out) = {
            let mut state = self.state.lock();
            state.index += 1;
            let index = state.index;
            (index, f(&mut state, index))
        };
        self.changes.send_replace(index);
        out
    }

    fn check_injected_failure(&self) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".to_string()).into());
        }
        Ok(())
    }

    fn metadata(
        &self,
        index: u64,
        opts: &QueryOptions,
    ) -> ResponseMetadata {
        let last_contact = if opts.allow_stale {
            *self.last_contact.lock()
        } else {
            Duration::ZERO
        };
        ResponseMetadata {
            last_index: index,
            last_contact,
            known_leader: true,
        }
    }

    /// Blocking read: returns once the index of the read data differs from
    /// `opts.wait_index`, or when `opts.wait_time` elapses.
    async fn blocking_read<T>(
        &self,
        opts: &QueryOptions,
        read: impl Fn(&MemState) -> (T, u64),
    ) -> Result<(T, ResponseMetadata)> {
        self.check_injected_failure()?;

        let wait = opts
            .wait_time
            .unwrap_or(Duration::from_millis(DEFAULT_BLOCKING_WAIT_MS));
        let deadline = Instant::now() + wait;
        let mut changes = self.changes.subscribe();

        loop {
            let (value, index) = {
                let state = self.state.lock();
                read(&state)
            };
            // Indexes never go below 1 so a zero wait index always means "don't block"
            let index = index.max(1);

            if opts.wait_index == 0 || index != opts.wait_index || Instant::now() >= deadline {
                return Ok((value, self.metadata(index, opts)));
            }

            trace!(wait_index = opts.wait_index, "blocking read waiting for change");
            match timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) | Err(_) => continue,
                Ok(Err(_)) => return Err(StoreError::Unavailable("store dropped".to_string()).into()),
            }
        }
    }

    // ---------------------------------------------------------------
    // Direct mutation API

    pub fn put_kv(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
    ) -> u64 {
        let value = value.into();
        self.commit(|state, index| {
            state.write_kv(key, value, index);
            index
        })
    }

    pub fn delete_kv(
        &self,
        key: &str,
    ) {
        self.commit(|state, index| {
            if state.kv.remove(key).is_some() {
                state.tombstones.insert(key.to_string(), index);
            }
        })
    }

    pub fn register_service(
        &self,
        instance: ServiceInstance,
    ) {
        self.commit(|state, index| {
            state.services.insert(instance.id.clone(), instance);
            state.services_index = index;
        })
    }

    pub fn deregister_service(
        &self,
        id: &str,
    ) {
        self.commit(|state, index| {
            if state.services.remove(id).is_some() {
                state.services_index = index;
            }
        })
    }

    pub fn register_node(
        &self,
        node: Node,
    ) {
        self.commit(|state, index| {
            state.nodes.insert(node.name.clone(), node);
            state.nodes_index = index;
        })
    }

    pub fn put_secret(
        &self,
        path: &str,
        secret: Secret,
    ) {
        self.commit(|state, _| {
            state.secrets.insert(path.trim_matches('/').to_string(), secret);
        })
    }

    pub fn delete_secret(
        &self,
        path: &str,
    ) {
        self.commit(|state, _| {
            state.secrets.remove(path.trim_matches('/'));
        })
    }

    /// Invalidates a session as if its TTL had lapsed
    pub fn invalidate_session(
        &self,
        session: &str,
    ) -> bool {
        self.state.lock().drop_session(session)
    }

    pub fn lock_holder(
        &self,
        key: &str,
    ) -> Option<String> {
        let mut state = self.state.lock();
        state.purge_expired(Instant::now());
        state.locks.get(key).cloned()
    }

    /// Latency reported for stale reads
    pub fn set_last_contact(
        &self,
        last_contact: Duration,
    ) {
        *self.last_contact.lock() = last_contact;
    }

    /// Makes the next `n` reads fail with `StoreError::Unavailable`
    pub fn fail_next_reads(
        &self,
        n: usize,
    ) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn current_index(&self) -> u64 {
        self.state.lock().index
    }
}

#[async_trait]
impl RemoteStore for MemStore {
    async fn get(
        &self,
        key: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<KvPair>, ResponseMetadata)> {
        self.blocking_read(opts, |state| {
            let pair = state.kv.get(key).cloned();
            let index = pair
                .as_ref()
                .map(|p| p.modify_index)
                .or_else(|| state.tombstones.get(key).copied())
                .unwrap_or(0);
            (pair, index)
        })
        .await
    }

    async fn list(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<KvPair>, ResponseMetadata)> {
        self.blocking_read(opts, |state| {
            let pairs = state.with_prefix(prefix).cloned().collect();
            (pairs, state.prefix_index(prefix))
        })
        .await
    }

    async fn keys(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<String>, ResponseMetadata)> {
        self.blocking_read(opts, |state| {
            let keys = state.with_prefix(prefix).map(|p| p.key.clone()).collect();
            (keys, state.prefix_index(prefix))
        })
        .await
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<u64> {
        Ok(self.put_kv(key, value))
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<()> {
        self.delete_kv(key);
        Ok(())
    }

    async fn put_if_held(
        &self,
        key: &str,
        value: Vec<u8>,
        lock: &str,
        session: &str,
    ) -> Result<bool> {
        let written = self.commit(|state, index| {
            state.purge_expired(Instant::now());
            if state.locks.get(lock).map(String::as_str) != Some(session) {
                return false;
            }
            state.write_kv(key, value, index);
            true
        });
        if !written {
            debug!(key, lock, session, "guarded write rejected, lock not held");
        }
        Ok(written)
    }

    async fn catalog_services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(Vec<CatalogService>, ResponseMetadata)> {
        self.blocking_read(opts, |state| {
            let mut by_name: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for instance in state.services.values() {
                let tags = by_name.entry(instance.name.as_str()).or_default();
                tags.extend(instance.tags.iter().cloned());
            }
            let services = by_name
                .into_iter()
                .map(|(name, mut tags)| {
                    tags.sort();
                    tags.dedup();
                    CatalogService {
                        name: name.to_string(),
                        tags,
                    }
                })
                .collect();
            (services, state.services_index)
        })
        .await
    }

    async fn catalog_service(
        &self,
        name: &str,
        tag: Option<String>,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceInstance>, ResponseMetadata)> {
        self.blocking_read(opts, |state| {
            let instances = state
                .services
                .values()
                .filter(|i| i.name == name)
                .filter(|i| tag.as_ref().map_or(true, |t| i.tags.contains(t)))
                .cloned()
                .collect();
            (instances, state.services_index)
        })
        .await
    }

    async fn catalog_nodes(
        &self,
        opts: &QueryOptions,
    ) -> Result<(Vec<Node>, ResponseMetadata)> {
        self.blocking_read(opts, |state| (state.nodes.values().cloned().collect(), state.nodes_index))
            .await
    }

    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<String> {
        let id = nanoid::nanoid!();
        let mut state = self.state.lock();
        state.purge_expired(Instant::now());
        state.sessions.insert(
            id.clone(),
            MemSession {
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        debug!(session = %id, name, ?ttl, "session created");
        Ok(id)
    }

    async fn renew_session(
        &self,
        session: &str,
    ) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge_expired(now);
        match state.sessions.get_mut(session) {
            Some(s) => {
                s.expires_at = now + s.ttl;
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(session.to_string()).into()),
        }
    }

    async fn destroy_session(
        &self,
        session: &str,
    ) -> Result<()> {
        self.state.lock().drop_session(session);
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        session: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        state.purge_expired(Instant::now());
        if !state.sessions.contains_key(session) {
            return Err(StoreError::SessionNotFound(session.to_string()).into());
        }
        match state.locks.get(key) {
            Some(holder) => Ok(holder == session),
            None => {
                state.locks.insert(key.to_string(), session.to_string());
                Ok(true)
            }
        }
    }

    async fn release_lock(
        &self,
        key: &str,
        session: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if state.locks.get(key).map(String::as_str) == Some(session) {
            state.locks.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl SecretStore for MemStore {
    async fn read(
        &self,
        path: &str,
    ) -> Result<Option<Secret>> {
        self.check_injected_failure()?;
        Ok(self.state.lock().secrets.get(path.trim_matches('/')).cloned())
    }

    async fn list(
        &self,
        path: &str,
    ) -> Result<Option<Secret>> {
        self.check_injected_failure()?;
        let prefix = format!("{}/", path.trim_matches('/'));
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .secrets
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => format!("{dir}/"),
                None => rest.to_string(),
            })
            .collect();
        keys.dedup();
        if keys.is_empty() {
            return Ok(None);
        }
        Ok(Some(Secret::with_keys(keys)))
    }
}
