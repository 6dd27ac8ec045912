//! Per-key lock keeper.
//!
//! ```text
//! Unheld ──> Acquiring ──> Held <──> Renewing
//!   ^            │                      │
//!   └────────────┘ (lock busy)          └──> Lost ──> Acquiring
//! ```
//!
//! The keeper owns one store session. While it holds the lock it renews the
//! session every `ttl / 2`; a failed renewal demotes it and the store's
//! session expiry frees the lock for another instance. While it does not hold
//! the lock it retries acquisition on the same interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::DedupPayload;
use crate::async_task::sleep_or_cancel;
use crate::async_task::task_with_exponential_backoff;
use crate::constants::DEDUP_SESSION_NAME;
use crate::metrics::DEDUP_DEMOTIONS;
use crate::metrics::DEDUP_PROMOTIONS;
use crate::BackoffPolicy;
use crate::ClientSet;
use crate::DedupError;
use crate::Error;
use crate::QueryKey;
use crate::QueryOptions;
use crate::StoreError;
use crate::SystemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Lock held by someone else, or not attempted yet
    Unheld,
    Acquiring,
    Held,
    /// Held, renewal in flight
    Renewing,
    /// Renewal failed; the store will release the lock
    Lost,
}

impl LeaseState {
    pub fn is_leader(&self) -> bool {
        matches!(self, LeaseState::Held | LeaseState::Renewing)
    }
}

/// Snapshot of one key's lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEntry {
    pub state: LeaseState,
    pub session: Option<String>,
    /// Last known leader: this instance while held, else the publisher of the
    /// last accepted payload
    pub leader: Option<String>,
    /// Leadership term of the last publisher this instance knows of
    pub epoch: u64,
    /// Highest generation published or accepted for the key
    pub generation: u64,
}

impl Default for LeaseEntry {
    fn default() -> Self {
        Self {
            state: LeaseState::Unheld,
            session: None,
            leader: None,
            epoch: 0,
            generation: 0,
        }
    }
}

pub(super) struct LeaseKeeper {
    pub(super) key: QueryKey,
    pub(super) lock_path: String,
    pub(super) data_path: String,
    pub(super) instance: String,
    pub(super) ttl: Duration,
    pub(super) interval: Duration,
    pub(super) retry: BackoffPolicy,
    pub(super) clients: ClientSet,
    pub(super) entry: Arc<watch::Sender<LeaseEntry>>,
    pub(super) cancel: CancellationToken,
}

impl LeaseKeeper {
    fn set_state(
        &self,
        state: LeaseState,
        session: Option<&str>,
    ) {
        self.entry.send_if_modified(|entry| {
            let session = session.map(str::to_string);
            if entry.state == state && entry.session == session {
                return false;
            }
            entry.state = state;
            entry.session = session;
            true
        });
    }

    async fn create_session(&self) -> crate::Result<String> {
        let store = self.clients.store();
        task_with_exponential_backoff(
            "dedup session",
            || store.create_session(DEDUP_SESSION_NAME, self.ttl),
            self.retry,
            &self.cancel,
        )
        .await
    }

    /// `(epoch, generation)` already published on the shared path
    async fn published_fence(&self) -> (u64, u64) {
        let opts = QueryOptions::default();
        match self.clients.store().get(&self.data_path, &opts).await {
            Ok((Some(pair), _)) => match DedupPayload::decode(&pair.value) {
                Ok(payload) => payload.fence(),
                Err(e) => {
                    warn!(query = %self.key, "unreadable dedup payload ignored: {e}");
                    (0, 0)
                }
            },
            Ok((None, _)) => (0, 0),
            Err(e) => {
                warn!(query = %self.key, "could not read dedup payload: {e}");
                (0, 0)
            }
        }
    }

    /// Starts a new term above anything published so far. The payload is
    /// read after the lock is taken, so no older leader can write past it.
    async fn promote(
        &self,
        session: &str,
    ) {
        let (epoch, generation) = self.published_fence().await;
        self.entry.send_modify(|entry| {
            entry.state = LeaseState::Held;
            entry.session = Some(session.to_string());
            entry.leader = Some(self.instance.clone());
            entry.epoch = entry.epoch.max(epoch) + 1;
            entry.generation = entry.generation.max(generation);
        });
        DEDUP_PROMOTIONS.inc();
        let entry = self.entry.borrow().clone();
        info!(
            query = %self.key,
            epoch = entry.epoch,
            generation = entry.generation,
            "acquired dedup lock, leading"
        );
    }

    /// Gives up a session the store no longer honours as lock holder
    async fn step_down(
        &self,
        session: &str,
    ) {
        self.set_state(LeaseState::Lost, None);
        DEDUP_DEMOTIONS.inc();
        if let Err(e) = self.clients.store().destroy_session(session).await {
            debug!(query = %self.key, "could not destroy fenced session: {e}");
        }
    }

    /// Renews until cancelled (`true`) or leadership is lost (`false`).
    ///
    /// Each renewal also confirms the store still maps the lock to this
    /// session. A publish rejected by the store marks the entry `Lost` and
    /// ends the hold right away.
    async fn hold(
        &self,
        session: &str,
    ) -> bool {
        let mut entry = self.entry.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return true,
                true = async { entry.wait_for(|e| e.state == LeaseState::Lost).await.is_ok() } => {
                    warn!(query = %self.key, session, "publish fenced by the store, stepping down");
                    self.step_down(session).await;
                    return false;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            self.set_state(LeaseState::Renewing, Some(session));
            let store = self.clients.store();
            let owned = match store.renew_session(session).await {
                Ok(()) => store.acquire_lock(&self.lock_path, session).await,
                Err(e) => Err(e),
            };
            match owned {
                Ok(true) => self.set_state(LeaseState::Held, Some(session)),
                Ok(false) => {
                    warn!(query = %self.key, session, "dedup lock taken by another session, stepping down");
                    self.step_down(session).await;
                    return false;
                }
                Err(e) => {
                    let lost = DedupError::SessionLost {
                        session: session.to_string(),
                    };
                    warn!(query = %self.key, "{lost}: {e}");
                    self.set_state(LeaseState::Lost, None);
                    DEDUP_DEMOTIONS.inc();
                    return false;
                }
            }
        }
    }

    pub(super) async fn run(self) {
        let mut session: Option<String> = None;
        let mut held = false;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let sid = match session.clone() {
                Some(sid) => sid,
                None => match self.create_session().await {
                    Ok(sid) => {
                        debug!(query = %self.key, session = %sid, "dedup session created");
                        session = Some(sid.clone());
                        sid
                    }
                    Err(Error::Dedup(DedupError::Stopped)) => break,
                    Err(e) => {
                        warn!(query = %self.key, "could not create dedup session: {e}");
                        if !sleep_or_cancel(&self.cancel, self.interval).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            self.set_state(LeaseState::Acquiring, Some(&sid));
            match self.clients.store().acquire_lock(&self.lock_path, &sid).await {
                Ok(true) => {
                    self.promote(&sid).await;
                    held = true;
                    if self.hold(&sid).await {
                        break;
                    }
                    held = false;
                    session = None;
                }
                Ok(false) => {
                    self.set_state(LeaseState::Unheld, Some(&sid));
                    if !sleep_or_cancel(&self.cancel, self.interval).await {
                        break;
                    }
                    // keep the follower session alive between attempts
                    if let Err(e) = self.clients.store().renew_session(&sid).await {
                        debug!(query = %self.key, "follower session gone: {e}");
                        session = None;
                    }
                }
                Err(Error::System(SystemError::Store(StoreError::SessionNotFound(_)))) => {
                    debug!(query = %self.key, session = %sid, "session expired before acquiring");
                    session = None;
                }
                Err(e) => {
                    warn!(query = %self.key, "dedup lock attempt failed: {e}");
                    self.set_state(LeaseState::Unheld, Some(&sid));
                    if !sleep_or_cancel(&self.cancel, self.interval).await {
                        break;
                    }
                }
            }
        }

        self.teardown(session.as_deref(), held).await;
    }

    async fn teardown(
        &self,
        session: Option<&str>,
        held: bool,
    ) {
        if let Some(session) = session {
            let store = self.clients.store();
            if held {
                if let Err(e) = store.release_lock(&self.lock_path, session).await {
                    warn!(query = %self.key, "could not release dedup lock: {e}");
                }
                DEDUP_DEMOTIONS.inc();
            }
            if let Err(e) = store.destroy_session(session).await {
                warn!(query = %self.key, "could not destroy dedup session: {e}");
            }
        }
        self.set_state(LeaseState::Unheld, None);
        debug!(query = %self.key, "lease keeper exited");
    }
}
