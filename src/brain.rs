//! Last known good value per query.

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::Error;
use crate::QueryData;
use crate::QueryKey;

/// Snapshot of one query's cached state
#[derive(Debug, Clone, Default)]
pub struct BrainEntry {
    pub data: Option<Arc<QueryData>>,
    /// Set by the first successful fetch, never cleared by failures
    pub received: bool,
    pub updated_at: Option<SystemTime>,
    pub last_error: Option<Arc<Error>>,
    /// A terminal failure was reported; the view is gone
    pub failed: bool,
}

/// Result cache read by consumers.
///
/// Writes come from the watcher's aggregator only; readers get whole-entry
/// snapshots and never observe a partially applied update.
#[derive(Debug, Default)]
pub struct Brain {
    entries: DashMap<QueryKey, BrainEntry>,
}

impl Brain {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn remember(
        &self,
        key: &QueryKey,
        data: Arc<QueryData>,
    ) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.data = Some(data);
        entry.received = true;
        entry.updated_at = Some(SystemTime::now());
        entry.last_error = None;
        entry.failed = false;
    }

    /// Records a failure and keeps the last good data
    pub(crate) fn mark_failed(
        &self,
        key: &QueryKey,
        error: Arc<Error>,
        terminal: bool,
    ) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.last_error = Some(error);
        entry.failed |= terminal;
    }

    pub(crate) fn forget(
        &self,
        key: &QueryKey,
    ) {
        self.entries.remove(key);
    }

    pub fn recall(
        &self,
        key: &QueryKey,
    ) -> Option<Arc<QueryData>> {
        self.entries.get(key).and_then(|e| e.data.clone())
    }

    pub fn entry(
        &self,
        key: &QueryKey,
    ) -> Option<BrainEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    pub fn received(
        &self,
        key: &QueryKey,
    ) -> bool {
        self.entries.get(key).map(|e| e.received).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
