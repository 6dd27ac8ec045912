//! Registry and aggregator of Views.
//!
//! The Watcher hands out one View per distinct shareable query, counts its
//! consumers, and funnels every View's notifications through one channel
//! into the Brain. Consumers subscribe to a debounced render signal and read
//! current values back through their [`QueryHandle`].

mod aggregator;
mod quiescence;


use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use self::aggregator::Aggregator;
use self::quiescence::Quiescence;
use crate::async_task::join_task;
use crate::async_task::spawn_task;
use crate::view::ViewPolicy;
use crate::Brain;
use crate::ClientSet;
use crate::DedupCoordinator;
use crate::DedupQuery;
use crate::Error;
use crate::MirrorConfig;
use crate::Query;
use crate::QueryData;
use crate::QueryError;
use crate::QueryKey;
use crate::QueryOptions;
use crate::Result;
use crate::View;
use crate::ViewState;

/// Keyed notification from a View to the aggregator
#[derive(Debug)]
pub enum WatcherEvent {
    Data {
        key: QueryKey,
        view_id: u64,
        data: Arc<QueryData>,
        index: u64,
    },
    Failure {
        key: QueryKey,
        view_id: u64,
        error: Arc<Error>,
        /// The View gave up and exited
        terminal: bool,
    },
}

impl WatcherEvent {
    fn source(&self) -> (&QueryKey, u64) {
        match self {
            WatcherEvent::Data { key, view_id, .. } | WatcherEvent::Failure { key, view_id, .. } => (key, *view_id),
        }
    }
}

/// "Render now": queries that changed since the previous signal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSignal {
    /// Increases by one per signal; 0 before the first one
    pub sequence: u64,
    pub changed: Vec<QueryKey>,
}

/// A consumer's registration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryHandle {
    key: QueryKey,
    view_id: u64,
}

impl QueryHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn view_id(&self) -> u64 {
        self.view_id
    }
}

struct ViewSlot {
    view: Arc<View>,
    consumers: usize,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct Registry {
    views: HashMap<QueryKey, ViewSlot>,
    next_view_id: u64,
    next_scope: u64,
}

impl Registry {
    pub(crate) fn is_active(
        &self,
        key: &QueryKey,
        view_id: u64,
    ) -> bool {
        self.views.get(key).is_some_and(|slot| slot.view.id() == view_id)
    }

    fn slot(
        &self,
        handle: &QueryHandle,
    ) -> Option<&ViewSlot> {
        self.views.get(&handle.key).filter(|slot| slot.view.id() == handle.view_id)
    }
}

pub struct Watcher {
    clients: ClientSet,
    config: MirrorConfig,
    brain: Arc<Brain>,
    registry: Arc<Mutex<Registry>>,
    events: mpsc::UnboundedSender<WatcherEvent>,
    render: watch::Receiver<RenderSignal>,
    dedup: Option<Arc<DedupCoordinator>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Watcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("views", &self.len())
            .field("dedup", &self.dedup)
            .finish()
    }
}

impl Watcher {
    /// Validates `config` and starts the aggregator. Must be called from
    /// within a tokio runtime.
    pub fn new(
        clients: ClientSet,
        config: MirrorConfig,
    ) -> Result<Self> {
        let config = config.validate()?;

        let (events, events_rx) = mpsc::unbounded_channel();
        let (render_tx, render) = watch::channel(RenderSignal::default());
        let registry = Arc::new(Mutex::new(Registry::default()));
        let brain = Arc::new(Brain::new());
        let cancel = CancellationToken::new();

        let dedup = config.dedup.enabled.then(|| {
            Arc::new(DedupCoordinator::new(
                clients.clone(),
                config.dedup.clone(),
                config.retry.store,
            ))
        });

        let aggregator = Aggregator {
            events: events_rx,
            registry: registry.clone(),
            brain: brain.clone(),
            quiescence: Quiescence::new(&config.wait),
            render: render_tx,
            cancel: cancel.child_token(),
            sequence: 0,
        };
        let mut tasks = Vec::new();
        spawn_task("watcher aggregator", aggregator.run(), Some(&mut tasks));

        info!(?config, "watcher started");
        Ok(Self {
            clients,
            config,
            brain,
            registry,
            events,
            render,
            dedup,
            tasks: Mutex::new(tasks),
            cancel,
        })
    }

    /// Registers a consumer of `query`.
    ///
    /// A shareable query whose key is already registered joins the existing
    /// View; `query` itself is then dropped unused, unless that View already
    /// gave up after a terminal failure, in which case `query` restarts it
    /// under the same handle. Everything else gets a View of its own.
    pub fn register(
        &self,
        query: Arc<dyn Query>,
    ) -> Result<QueryHandle> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Stopped.into());
        }

        let base = query.key();
        let shareable = query.can_share();
        let mut registry = self.registry.lock();

        if shareable {
            if let Some(slot) = registry.views.get_mut(&base) {
                let view_id = slot.view.id();
                if slot.view.state() == ViewState::Stopped {
                    info!(query = %base, view = view_id, "restarting view that gave up");
                    slot.view.stop();
                    let (view, task) = self.spawn_view(view_id, &base, query)?;
                    slot.view = Arc::new(view);
                    slot.task = task;
                }
                slot.consumers += 1;
                debug!(query = %base, consumers = slot.consumers, "joined existing view");
                return Ok(QueryHandle { key: base, view_id });
            }
        }

        let key = if shareable {
            base
        } else {
            registry.next_scope += 1;
            base.scoped(registry.next_scope)
        };

        registry.next_view_id += 1;
        let view_id = registry.next_view_id;
        let (view, task) = self.spawn_view(view_id, &key, query)?;
        registry.views.insert(
            key.clone(),
            ViewSlot {
                view: Arc::new(view),
                consumers: 1,
                task,
            },
        );

        info!(query = %key, view = view_id, "watching");
        Ok(QueryHandle { key, view_id })
    }

    fn spawn_view(
        &self,
        view_id: u64,
        key: &QueryKey,
        query: Arc<dyn Query>,
    ) -> Result<(View, JoinHandle<()>)> {
        let fetcher: Arc<dyn Query> = match &self.dedup {
            Some(dedup) if query.can_share() => Arc::new(DedupQuery::new(query, dedup.clone())?),
            _ => query,
        };
        Ok(View::spawn(
            view_id,
            key.clone(),
            fetcher,
            self.clients.clone(),
            self.view_policy(key),
            self.events.clone(),
        ))
    }

    fn view_policy(
        &self,
        key: &QueryKey,
    ) -> ViewPolicy {
        let retry = if key.kind().is_secret() {
            self.config.retry.secrets
        } else {
            self.config.retry.store
        };
        ViewPolicy {
            retry,
            max_stale: self.config.query.max_stale(),
            options: QueryOptions::from_config(&self.config.query),
        }
    }

    /// Drops one consumer. The View is stopped and its data forgotten when
    /// the last consumer leaves. Returns `false` for unknown handles.
    pub fn deregister(
        &self,
        handle: &QueryHandle,
    ) -> bool {
        let mut registry = self.registry.lock();
        let Some(slot) = registry.views.get_mut(&handle.key) else {
            return false;
        };
        if slot.view.id() != handle.view_id {
            return false;
        }

        slot.consumers = slot.consumers.saturating_sub(1);
        if slot.consumers > 0 {
            debug!(query = %handle.key, consumers = slot.consumers, "consumer left");
            return true;
        }

        if let Some(slot) = registry.views.remove(&handle.key) {
            self.evict(&handle.key, slot);
        }
        true
    }

    /// Evicts every View whose key is not held by one of `keep`, whatever
    /// its consumer count. Returns the number of evicted Views.
    pub fn deregister_all_except(
        &self,
        keep: &[QueryHandle],
    ) -> usize {
        let keep: HashSet<&QueryKey> = keep.iter().map(|h| &h.key).collect();
        let mut registry = self.registry.lock();

        let evicted: Vec<QueryKey> = registry.views.keys().filter(|k| !keep.contains(k)).cloned().collect();
        for key in &evicted {
            if let Some(slot) = registry.views.remove(key) {
                self.evict(key, slot);
            }
        }
        evicted.len()
    }

    /// Called with the registry lock held so the aggregator cannot write
    /// the key back in between.
    fn evict(
        &self,
        key: &QueryKey,
        slot: ViewSlot,
    ) {
        info!(query = %key, view = slot.view.id(), "unwatching");
        slot.view.stop();
        self.brain.forget(key);
    }

    /// Current value for `handle`; `None` before the first fetch or after
    /// deregistration
    pub fn recall(
        &self,
        handle: &QueryHandle,
    ) -> Option<Arc<QueryData>> {
        let registry = self.registry.lock();
        registry.slot(handle)?;
        self.brain.recall(&handle.key)
    }

    /// Last error reported for `handle`, cleared by the next success
    pub fn failure(
        &self,
        handle: &QueryHandle,
    ) -> Option<Arc<Error>> {
        let registry = self.registry.lock();
        registry.slot(handle)?;
        self.brain.entry(&handle.key).and_then(|e| e.last_error)
    }

    pub fn view(
        &self,
        handle: &QueryHandle,
    ) -> Option<Arc<View>> {
        self.registry.lock().slot(handle).map(|slot| slot.view.clone())
    }

    pub fn consumers(
        &self,
        handle: &QueryHandle,
    ) -> usize {
        self.registry.lock().slot(handle).map(|slot| slot.consumers).unwrap_or(0)
    }

    /// Whether every registered query has received data at least once
    pub fn all_loaded(&self) -> bool {
        let registry = self.registry.lock();
        registry.views.keys().all(|key| self.brain.received(key))
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderSignal> {
        self.render.clone()
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    pub fn dedup(&self) -> Option<&Arc<DedupCoordinator>> {
        self.dedup.as_ref()
    }

    /// Number of running Views
    pub fn len(&self) -> usize {
        self.registry.lock().views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every View, releases dedup locks and ends the aggregator.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let slots: Vec<(QueryKey, ViewSlot)> = self.registry.lock().views.drain().collect();
        for (_, slot) in &slots {
            slot.view.stop();
        }
        let joins = slots.into_iter().map(|(key, slot)| {
            self.brain.forget(&key);
            async move { (key, join_task(slot.task).await) }
        });
        for (key, result) in join_all(joins).await {
            if let Err(e) = result {
                warn!(query = %key, "view task failed: {e}");
            }
        }

        if let Some(dedup) = &self.dedup {
            dedup.stop().await;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = join_task(task).await {
                warn!("watcher task failed: {e}");
            }
        }
        info!("watcher stopped");
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        for slot in self.registry.lock().views.values() {
            slot.view.stop();
        }
        if let Some(dedup) = &self.dedup {
            dedup.shutdown();
        }
    }
}
