use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::quiescence::Quiescence;
use super::Registry;
use super::RenderSignal;
use super::WatcherEvent;
use crate::metrics::RENDER_SIGNALS;
use crate::Brain;
use crate::QueryKey;
use crate::Result;

/// Single consumer of the fan-in channel and the only writer of fetched
/// data into the Brain.
pub(super) struct Aggregator {
    pub(super) events: mpsc::UnboundedReceiver<WatcherEvent>,
    pub(super) registry: Arc<Mutex<Registry>>,
    pub(super) brain: Arc<Brain>,
    pub(super) quiescence: Quiescence,
    pub(super) render: watch::Sender<RenderSignal>,
    pub(super) cancel: CancellationToken,
    pub(super) sequence: u64,
}

impl Aggregator {
    pub(super) async fn run(mut self) -> Result<()> {
        loop {
            let deadline = self.quiescence.deadline();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.ingest(event),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => self.flush(),
            }
        }
        debug!("aggregator exited");
        Ok(())
    }

    fn ingest(
        &mut self,
        event: WatcherEvent,
    ) {
        let Some(key) = self.apply(event) else {
            return;
        };
        let now = Instant::now();
        self.quiescence.touch(key, now);
        if self.quiescence.is_due(now) {
            self.flush();
        }
    }

    /// Applies an event to the Brain. Returns the key when consumers should
    /// be told about it.
    fn apply(
        &self,
        event: WatcherEvent,
    ) -> Option<QueryKey> {
        let registry = self.registry.lock();
        let (key, view_id) = event.source();
        if !registry.is_active(key, view_id) {
            trace!(query = %key, view = view_id, "dropping event from evicted view");
            return None;
        }

        match event {
            WatcherEvent::Data { key, data, index, .. } => {
                trace!(query = %key, index, "remembering data");
                self.brain.remember(&key, data);
                Some(key)
            }
            WatcherEvent::Failure {
                key, error, terminal, ..
            } => {
                self.brain.mark_failed(&key, error, terminal);
                terminal.then_some(key)
            }
        }
    }

    fn flush(&mut self) {
        let changed = self.quiescence.take();
        if changed.is_empty() {
            return;
        }
        self.sequence += 1;
        RENDER_SIGNALS.inc();
        debug!(sequence = self.sequence, changed = changed.len(), "render signal");
        self.render.send_replace(RenderSignal {
            sequence: self.sequence,
            changed,
        });
    }
}
