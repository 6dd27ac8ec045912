use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::kv_list::relative_key;
use super::kv_list::scan_prefix;
use super::normalize_path;
use super::until_stopped;
use super::Query;
use super::QueryData;
use super::QueryKey;
use super::QueryKind;
use super::QueryOptions;
use super::ResponseMetadata;
use crate::ClientSet;
use crate::Result;

/// Key names under a prefix, relative to it
#[derive(Debug)]
pub struct KvKeysQuery {
    prefix: String,
    scan: String,
    stop: CancellationToken,
}

impl KvKeysQuery {
    pub fn new(prefix: &str) -> Result<Self> {
        let prefix = normalize_path(prefix);
        Ok(Self {
            scan: scan_prefix(&prefix),
            prefix,
            stop: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Query for KvKeysQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let (keys, meta) = until_stopped(&self.stop, clients.store().keys(&self.scan, &opts)).await?;
        let keys = keys
            .iter()
            .filter_map(|k| relative_key(&self.scan, k))
            .map(str::to_string)
            .collect();
        Ok((QueryData::Keys(keys), meta))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(QueryKind::KvKeys, self.prefix.clone())
    }
}
