//! Fetch loop of one query.
//!
//! A View owns exactly one [`Query`] and drives it on its own task:
//! long-poll with the last seen change token, notify the watcher when the
//! token moves, back off on failures. It never touches the Brain.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::async_task::sleep_or_cancel;
use crate::backoff::backoff_delay;
use crate::metrics::ACTIVE_VIEWS;
use crate::metrics::QUERY_FETCH_DURATION_MS;
use crate::metrics::QUERY_FETCH_ERRORS;
use crate::metrics::QUERY_FETCH_TOTAL;
use crate::BackoffPolicy;
use crate::ClientSet;
use crate::Error;
use crate::Query;
use crate::QueryError;
use crate::QueryKey;
use crate::QueryOptions;
use crate::WatcherEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Fetching,
    /// Backing off after a failure
    Waiting,
    Stopped,
}

/// Per-view retry and read policy
#[derive(Debug, Clone, Copy)]
pub(crate) struct ViewPolicy {
    pub(crate) retry: BackoffPolicy,
    pub(crate) max_stale: Option<Duration>,
    pub(crate) options: QueryOptions,
}

/// Handle on a running fetch loop
pub struct View {
    id: u64,
    key: QueryKey,
    query: Arc<dyn Query>,
    state: Arc<Mutex<ViewState>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for View {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("View")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

impl View {
    /// Starts the fetch loop on a new task.
    pub(crate) fn spawn(
        id: u64,
        key: QueryKey,
        query: Arc<dyn Query>,
        clients: ClientSet,
        policy: ViewPolicy,
        events: mpsc::UnboundedSender<WatcherEvent>,
    ) -> (Self, JoinHandle<()>) {
        let view = View {
            id,
            key: key.clone(),
            query: query.clone(),
            state: Arc::new(Mutex::new(ViewState::Idle)),
            cancel: CancellationToken::new(),
        };
        let fetch_loop = FetchLoop {
            id,
            key,
            query,
            clients,
            policy,
            events,
            state: view.state.clone(),
            cancel: view.cancel.clone(),
        };
        ACTIVE_VIEWS.inc();
        let handle = tokio::spawn(fetch_loop.run());
        (view, handle)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> ViewState {
        *self.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Interrupts any pending wait or fetch and ends the loop. Idempotent.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        debug!(query = %self.key, view = self.id, "stopping view");
        self.cancel.cancel();
        self.query.stop();
    }
}

struct FetchLoop {
    id: u64,
    key: QueryKey,
    query: Arc<dyn Query>,
    clients: ClientSet,
    policy: ViewPolicy,
    events: mpsc::UnboundedSender<WatcherEvent>,
    state: Arc<Mutex<ViewState>>,
    cancel: CancellationToken,
}

impl FetchLoop {
    fn set_state(
        &self,
        state: ViewState,
    ) {
        *self.state.lock() = state;
    }

    /// Returns `false` once nobody listens anymore
    fn notify(
        &self,
        event: WatcherEvent,
    ) -> bool {
        self.events.send(event).is_ok()
    }

    fn failure(
        &self,
        error: Error,
        terminal: bool,
    ) -> bool {
        self.notify(WatcherEvent::Failure {
            key: self.key.clone(),
            view_id: self.id,
            error: Arc::new(error),
            terminal,
        })
    }

    async fn run(self) {
        let kind = self.key.kind().as_str();
        let stale_enabled = self.policy.max_stale.is_some();

        let mut last_index = 0;
        let mut received = false;
        let mut allow_stale = stale_enabled;
        let mut failures = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ViewState::Fetching);

            let opts = self.policy.options.with_wait_index(last_index).with_stale(allow_stale);
            trace!(query = %self.key, wait_index = last_index, allow_stale, "fetching");

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = self.query.fetch(&self.clients, opts) => r,
            };
            QUERY_FETCH_TOTAL.with_label_values(&[kind]).inc();
            QUERY_FETCH_DURATION_MS
                .with_label_values(&[kind])
                .observe(started.elapsed().as_secs_f64() * 1000.0);

            match result {
                Ok((data, meta)) => {
                    let recovered = failures > 0;
                    failures = 0;

                    if allow_stale {
                        if let Some(max_stale) = self.policy.max_stale {
                            if meta.is_stale(max_stale) {
                                debug!(
                                    query = %self.key,
                                    last_contact = ?meta.last_contact,
                                    "stale response discarded, retrying against the leader"
                                );
                                allow_stale = false;
                                continue;
                            }
                        }
                    }
                    allow_stale = stale_enabled;

                    // Re-sent after a failure streak so consumers see the error cleared
                    if received && meta.last_index == last_index && !recovered {
                        trace!(query = %self.key, index = last_index, "no change");
                        continue;
                    }
                    if meta.last_index < last_index {
                        debug!(
                            query = %self.key,
                            last_index,
                            new_index = meta.last_index,
                            "change index went backwards, resetting"
                        );
                        last_index = 0;
                        continue;
                    }

                    last_index = meta.last_index;
                    received = true;
                    debug!(query = %self.key, index = last_index, "data changed");
                    let event = WatcherEvent::Data {
                        key: self.key.clone(),
                        view_id: self.id,
                        data: Arc::new(data),
                        index: last_index,
                    };
                    if !self.notify(event) {
                        break;
                    }
                }
                Err(e) if e.is_stopped() => break,
                Err(e) => {
                    QUERY_FETCH_ERRORS.with_label_values(&[kind]).inc();

                    if e.is_malformed() {
                        warn!(query = %self.key, "unusable response, giving up: {e}");
                        self.failure(e, true);
                        break;
                    }

                    failures += 1;
                    if !self.policy.retry.allows_retry(failures) {
                        warn!(query = %self.key, attempts = failures, "retries exhausted: {e}");
                        let exhausted = QueryError::RetryExhausted {
                            query: self.key.clone(),
                            attempts: failures,
                            last: e.to_string(),
                        };
                        self.failure(exhausted.into(), true);
                        break;
                    }

                    let delay = backoff_delay(&self.policy.retry, failures, &mut rand::thread_rng());
                    warn!(
                        query = %self.key,
                        attempt = failures,
                        delay = ?delay.total(),
                        "fetch failed, retrying: {e}"
                    );
                    if !self.failure(e, false) {
                        break;
                    }

                    self.set_state(ViewState::Waiting);
                    if !sleep_or_cancel(&self.cancel, delay.total()).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ViewState::Stopped);
        ACTIVE_VIEWS.dec();
        debug!(query = %self.key, view = self.id, "view loop exited");
    }
}
