use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ClientSet;
use crate::Query;
use crate::QueryData;
use crate::QueryError;
use crate::QueryKey;
use crate::QueryKind;
use crate::QueryOptions;
use crate::ResponseMetadata;
use crate::Result;

type Step = Result<(QueryData, ResponseMetadata)>;

/// Query answering from a script.
///
/// Once the script is exhausted every fetch blocks until the query is
/// stopped, like an idle long-poll.
pub struct StubQuery {
    key: QueryKey,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<QueryOptions>>,
    stop: CancellationToken,
}

impl StubQuery {
    pub fn new(
        kind: QueryKind,
        params: &str,
    ) -> Self {
        Self {
            key: QueryKey::new(kind, params),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            stop: CancellationToken::new(),
        }
    }

    pub fn kv(key: &str) -> Self {
        Self::new(QueryKind::KvGet, key)
    }

    pub fn then(
        self,
        step: Step,
    ) -> Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn then_data(
        self,
        data: QueryData,
        index: u64,
    ) -> Self {
        self.then(Ok((data, ResponseMetadata::with_index(index))))
    }

    pub fn push(
        &self,
        step: Step,
    ) {
        self.script.lock().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_options(&self) -> Vec<QueryOptions> {
        self.seen.lock().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

#[async_trait]
impl Query for StubQuery {
    async fn fetch(
        &self,
        _clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        if self.stop.is_cancelled() {
            return Err(QueryError::Stopped.into());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(opts);

        let next = self.script.lock().pop_front();
        match next {
            Some(step) => step,
            None => {
                self.stop.cancelled().await;
                Err(QueryError::Stopped.into())
            }
        }
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        self.key.clone()
    }
}
