use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::normalize_path;
use super::poll_delay;
use super::sleep_until_stopped;
use super::until_stopped;
use super::LeaseTracker;
use super::Query;
use super::QueryData;
use super::QueryKey;
use super::QueryKind;
use super::QueryOptions;
use super::ResponseMetadata;
use super::Secret;
use super::SecretValue;
use crate::ClientSet;
use crate::QueryError;
use crate::Result;

/// Child names under a secret path, sorted.
///
/// Listings carry no lease; refetches wait the default lease window.
#[derive(Debug)]
pub struct SecretListQuery {
    path: String,
    tracker: LeaseTracker<Vec<String>>,
    stop: CancellationToken,
}

impl SecretListQuery {
    pub fn new(path: &str) -> Result<Self> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(QueryError::InvalidFormat {
                kind: QueryKind::SecretList.as_str(),
                input: path,
            }
            .into());
        }
        Ok(Self {
            path,
            tracker: LeaseTracker::new(),
            stop: CancellationToken::new(),
        })
    }

    fn parse_keys(
        &self,
        secret: Option<Secret>,
    ) -> Result<Vec<String>> {
        let Some(secret) = secret else {
            return Ok(Vec::new());
        };
        let unexpected = |reason: &str| QueryError::UnexpectedResponse {
            query: self.key().to_string(),
            reason: reason.to_string(),
        };

        let mut keys = match secret.data.get("keys") {
            None => return Ok(Vec::new()),
            Some(SecretValue::List(values)) => values
                .iter()
                .map(|v| match v {
                    SecretValue::String(s) => Ok(s.clone()),
                    other => Err(unexpected(&format!("non-string key {other:?}"))),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Some(other) => return Err(unexpected(&format!("keys is not a list: {other:?}")).into()),
        };
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl Query for SecretListQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let secrets = clients.secrets()?;

        if let Some(delay) = poll_delay(&opts, std::time::Duration::ZERO) {
            sleep_until_stopped(&self.stop, delay).await?;
        }

        let response = until_stopped(&self.stop, secrets.list(&self.path)).await?;
        let keys = self.parse_keys(response)?;

        let token = self.tracker.observe(&keys);
        Ok((QueryData::SecretKeys(keys), ResponseMetadata::with_index(token)))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(QueryKind::SecretList, self.path.clone())
    }
}
