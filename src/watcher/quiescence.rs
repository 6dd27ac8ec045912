use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::QueryKey;
use crate::WaitConfig;

/// Debounce window for render signals.
///
/// The first change of a burst arms both timers. Every further change
/// restarts the `min` timer; the `max` timer keeps running, which bounds the
/// delay of a burst that never goes quiet. With both zero every change fires
/// right away.
#[derive(Debug)]
pub(crate) struct Quiescence {
    min: Duration,
    max: Duration,
    min_deadline: Option<Instant>,
    max_deadline: Option<Instant>,
    pending: BTreeSet<QueryKey>,
}

impl Quiescence {
    pub(crate) fn new(wait: &WaitConfig) -> Self {
        let (min, max) = if wait.is_disabled() {
            (Duration::ZERO, Duration::ZERO)
        } else {
            (wait.min(), wait.max())
        };
        Self {
            min,
            max,
            min_deadline: None,
            max_deadline: None,
            pending: BTreeSet::new(),
        }
    }

    pub(crate) fn is_immediate(&self) -> bool {
        self.min.is_zero() && self.max.is_zero()
    }

    /// Records a change at `now`
    pub(crate) fn touch(
        &mut self,
        key: QueryKey,
        now: Instant,
    ) {
        self.pending.insert(key);
        if self.is_immediate() {
            return;
        }
        self.min_deadline = Some(now + self.min);
        if self.max_deadline.is_none() {
            self.max_deadline = Some(now + self.max);
        }
    }

    /// When the pending burst should be flushed
    pub(crate) fn deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        match (self.min_deadline, self.max_deadline) {
            (Some(min), Some(max)) => Some(min.min(max)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn is_due(
        &self,
        now: Instant,
    ) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.is_immediate() || self.deadline().is_some_and(|d| d <= now)
    }

    /// Ends the burst and returns the keys that changed during it
    pub(crate) fn take(&mut self) -> Vec<QueryKey> {
        self.min_deadline = None;
        self.max_deadline = None;
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}
