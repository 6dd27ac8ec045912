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

/// All registered service names with their tags, sorted by name
#[derive(Debug, Default)]
pub struct CatalogServicesQuery {
    stop: CancellationToken,
}

impl CatalogServicesQuery {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Query for CatalogServicesQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let (mut services, meta) = until_stopped(&self.stop, clients.store().catalog_services(&opts)).await?;
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((QueryData::Services(services), meta))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(QueryKind::CatalogServices, "")
    }
}
