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
use crate::QueryError;
use crate::Result;

/// Single key lookup. An absent key yields `QueryData::Pair(None)`.
#[derive(Debug)]
pub struct KvGetQuery {
    key: String,
    stop: CancellationToken,
}

impl KvGetQuery {
    pub fn new(key: &str) -> Result<Self> {
        let key = normalize_path(key);
        if key.is_empty() {
            return Err(QueryError::InvalidFormat {
                kind: QueryKind::KvGet.as_str(),
                input: key,
            }
            .into());
        }
        Ok(Self {
            key,
            stop: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Query for KvGetQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        trace!(key = %self.key, wait_index = opts.wait_index, "kv.get fetch");
        let (pair, meta) = until_stopped(&self.stop, clients.store().get(&self.key, &opts)).await?;
        Ok((QueryData::Pair(pair), meta))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(QueryKind::KvGet, self.key.clone())
    }
}
