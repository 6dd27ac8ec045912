use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;

use super::QueryOptions;

/// Secret payload as returned by the secret backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Secret {
    pub request_id: String,
    pub lease_id: String,
    /// Lease length in seconds; 0 when the secret carries no lease
    pub lease_duration: u64,
    pub renewable: bool,
    pub data: BTreeMap<String, SecretValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretValue {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<SecretValue>),
}

impl Secret {
    /// Listing response shape: `data.keys` holds the child names
    pub fn with_keys(keys: Vec<String>) -> Self {
        let mut data = BTreeMap::new();
        data.insert("keys".to_string(), SecretValue::List(keys.into_iter().map(SecretValue::String).collect()));
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_lease(
        mut self,
        lease_duration: u64,
    ) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn insert(
        mut self,
        key: impl Into<String>,
        value: SecretValue,
    ) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_duration)
    }
}

/// Fabricates change tokens for a backend without native indexes.
///
/// The token starts at 1 and only advances when the fetched payload differs
/// from the previous one.
#[derive(Debug)]
pub(crate) struct LeaseTracker<T> {
    state: Mutex<Option<(u64, T)>>,
}

impl<T: PartialEq + Clone> LeaseTracker<T> {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(None) }
    }

    pub(crate) fn observe(
        &self,
        payload: &T,
    ) -> u64 {
        let mut state = self.state.lock();
        let token = match state.as_ref() {
            Some((token, last)) if last == payload => *token,
            Some((token, _)) => token + 1,
            None => 1,
        };
        *state = Some((token, payload.clone()));
        token
    }
}

/// How long to wait before refetching a lease-bearing secret.
///
/// First fetches (`wait_index == 0`) return immediately.
pub(crate) fn poll_delay(
    opts: &QueryOptions,
    lease: Duration,
) -> Option<Duration> {
    if opts.wait_index == 0 {
        return None;
    }
    Some(opts.lease.sleep_for(lease))
}
