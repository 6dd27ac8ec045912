use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

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
use crate::ClientSet;
use crate::QueryError;
use crate::Result;

/// Leased secret read.
///
/// The secret backend has no blocking reads. Once a secret is held, the next
/// fetch sleeps for a share of the lease before reading again, which turns
/// plain reads into a long-poll with a synthetic wait window.
#[derive(Debug)]
pub struct SecretReadQuery {
    path: String,
    tracker: LeaseTracker<Secret>,
    last_lease: Mutex<Duration>,
    stop: CancellationToken,
}

impl SecretReadQuery {
    pub fn new(path: &str) -> Result<Self> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(QueryError::InvalidFormat {
                kind: QueryKind::SecretRead.as_str(),
                input: path,
            }
            .into());
        }
        Ok(Self {
            path,
            tracker: LeaseTracker::new(),
            last_lease: Mutex::new(Duration::ZERO),
            stop: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Query for SecretReadQuery {
    async fn fetch(
        &self,
        clients: &ClientSet,
        opts: QueryOptions,
    ) -> Result<(QueryData, ResponseMetadata)> {
        let secrets = clients.secrets()?;

        let lease = *self.last_lease.lock();
        if let Some(delay) = poll_delay(&opts, lease) {
            trace!(path = %self.path, ?delay, "secret.read waiting for lease renewal window");
            sleep_until_stopped(&self.stop, delay).await?;
        }

        let secret = until_stopped(&self.stop, secrets.read(&self.path))
            .await?
            .unwrap_or_default();
        *self.last_lease.lock() = secret.lease();

        let token = self.tracker.observe(&secret);
        Ok((QueryData::Secret(secret), ResponseMetadata::with_index(token)))
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(QueryKind::SecretRead, self.path.clone())
    }
}
