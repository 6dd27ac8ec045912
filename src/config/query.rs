use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_BLOCKING_WAIT_MS;
use crate::constants::DEFAULT_LEASE_DURATION_MS;
use crate::constants::DEFAULT_LEASE_RENEWAL_FRACTION;
use crate::Error;
use crate::Result;

/// Parameters passed to every fetch a View performs
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct QueryConfig {
    /// Upper bound for one server-side blocking read
    #[serde(default = "default_block_wait_ms")]
    pub block_wait_ms: u64,

    /// Accept stale reads whose last contact with the store leader is within
    /// this bound. 0 disables stale reads.
    #[serde(default)]
    pub max_stale_ms: u64,

    /// Lease assumed for secrets reporting a zero lease duration
    #[serde(default = "default_lease_duration_ms")]
    pub default_lease_duration_ms: u64,

    /// Share of the lease a secret query waits before refetching.
    /// Must be in (0, 1) so the refetch lands before expiry.
    #[serde(default = "default_lease_renewal_fraction")]
    pub lease_renewal_fraction: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            block_wait_ms: default_block_wait_ms(),
            max_stale_ms: 0,
            default_lease_duration_ms: default_lease_duration_ms(),
            lease_renewal_fraction: default_lease_renewal_fraction(),
        }
    }
}

impl QueryConfig {
    pub fn block_wait(&self) -> Duration {
        Duration::from_millis(self.block_wait_ms)
    }

    pub fn max_stale(&self) -> Option<Duration> {
        (self.max_stale_ms > 0).then(|| Duration::from_millis(self.max_stale_ms))
    }

    pub fn default_lease_duration(&self) -> Duration {
        Duration::from_millis(self.default_lease_duration_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_wait_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "query.block_wait_ms must be greater than 0".into(),
            )));
        }

        if self.default_lease_duration_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "query.default_lease_duration_ms must be greater than 0".into(),
            )));
        }

        if !(self.lease_renewal_fraction > 0.0 && self.lease_renewal_fraction < 1.0) {
            return Err(Error::Config(ConfigError::Message(format!(
                "query.lease_renewal_fraction must be in (0, 1), got {}",
                self.lease_renewal_fraction
            ))));
        }

        Ok(())
    }
}

fn default_block_wait_ms() -> u64 {
    DEFAULT_BLOCKING_WAIT_MS
}
fn default_lease_duration_ms() -> u64 {
    DEFAULT_LEASE_DURATION_MS
}
fn default_lease_renewal_fraction() -> f64 {
    DEFAULT_LEASE_RENEWAL_FRACTION
}
