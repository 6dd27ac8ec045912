use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::until_stopped;
use super::Query;
use super::QueryData;
use super::QueryKey;
use super::QueryKind;
use super::QueryOptions;
use super::ResponseMetadata;
use crate::ClientSet;
use crate::Result;

#[derive(Debug, Default)]
pub struct CatalogNodesQuery {
    stop: CancellationToken,
}

impl CatalogNodesQuery {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Query for CatalogNodesQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let (mut nodes, meta) = until_stopped(&self.stop, clients.store().catalog_nodes(&opts)).await?;
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((QueryData::Nodes(nodes), meta))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(QueryKind::CatalogNodes, "")
    }
}
