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
use crate::QueryError;
use crate::Result;

/// Healthy-or-not instances of one service, optionally filtered by tag.
///
/// Accepts `name` or `tag.name`; the name is the part after the last dot.
#[derive(Debug)]
pub struct CatalogServiceQuery {
    name: String,
    tag: Option<String>,
    stop: CancellationToken,
}

impl CatalogServiceQuery {
    pub fn new(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || QueryError::InvalidFormat {
            kind: QueryKind::CatalogService.as_str(),
            input: input.to_string(),
        };

        let (tag, name) = match input.rsplit_once('.') {
            Some((tag, name)) => {
                if tag.is_empty() {
                    return Err(invalid().into());
                }
                (Some(tag.to_string()), name)
            }
            None => (None, input),
        };
        if name.is_empty() || name.contains('/') {
            return Err(invalid().into());
        }

        Ok(Self {
            name: name.to_string(),
            tag,
            stop: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

#[async_trait]
impl Query for CatalogServiceQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let (mut instances, meta) = until_stopped(
            &self.stop,
            clients.store().catalog_service(&self.name, self.tag.clone(), &opts),
        )
        .await?;
        instances.sort_by(|a, b| a.node.cmp(&b.node).then_with(|| a.id.cmp(&b.id)));
        Ok((QueryData::ServiceInstances(instances), meta))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        let params = match &self.tag {
            Some(tag) => format!("{tag}.{}", self.name),
            None => self.name.clone(),
        };
        QueryKey::new(QueryKind::CatalogService, params)
    }
}
