use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::normalize_path;
use super::until_stopped;
use super::Query;
use super::QueryData;
use super::QueryKey;
use super::QueryKind;
use super::QueryOptions;
use super::ResponseMetadata;
use crate::ClientSet;
use crate::KvPair;
use crate::Result;

/// Recursive listing under a prefix.
///
/// Returned keys are relative to the prefix; the entry named exactly like
/// the prefix (a "folder" marker) is skipped.
#[derive(Debug)]
pub struct KvListQuery {
    prefix: String,
    scan: String,
    stop: CancellationToken,
}

impl KvListQuery {
    pub fn new(prefix: &str) -> Result<Self> {
        let prefix = normalize_path(prefix);
        Ok(Self {
            scan: scan_prefix(&prefix),
            prefix,
            stop: CancellationToken::new(),
        })
    }
}

/// Store-side scan for a normalized prefix. A non-empty prefix is scanned as
/// a folder so `app` never matches `apple/…`.
pub(crate) fn scan_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    }
}

/// Strips the scan prefix from `key`; `None` for the folder marker itself
pub(crate) fn relative_key<'a>(
    scan: &str,
    key: &'a str,
) -> Option<&'a str> {
    let rest = key.strip_prefix(scan)?;
    if rest.is_empty() {
        return None;
    }
    Some(rest)
}

#[async_trait]
impl Query for KvListQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        trace!(prefix = %self.prefix, wait_index = opts.wait_index, "kv.list fetch");
        let (pairs, meta) = until_stopped(&self.stop, clients.store().list(&self.scan, &opts)).await?;

        let pairs = pairs
            .into_iter()
            .filter_map(|p| {
                let key = relative_key(&self.scan, &p.key)?.to_string();
                Some(KvPair { key, ..p })
            })
            .collect();
        Ok((QueryData::Pairs(pairs), meta))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(QueryKind::KvList, self.prefix.clone())
    }
}
