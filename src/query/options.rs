use std::time::Duration;

use crate::constants::DEFAULT_LEASE_DURATION_MS;
use crate::constants::DEFAULT_LEASE_RENEWAL_FRACTION;
use crate::QueryConfig;

/// How lease-bearing secrets emulate long-polling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeasePolling {
    /// Share of the lease to wait before refetching, in (0, 1)
    pub renewal_fraction: f64,
    /// Wait used when the secret reports no lease
    pub default_lease_duration: Duration,
}

impl Default for LeasePolling {
    fn default() -> Self {
        Self {
            renewal_fraction: DEFAULT_LEASE_RENEWAL_FRACTION,
            default_lease_duration: Duration::from_millis(DEFAULT_LEASE_DURATION_MS),
        }
    }
}

impl LeasePolling {
    pub fn sleep_for(
        &self,
        lease: Duration,
    ) -> Duration {
        if lease.is_zero() {
            return self.default_lease_duration;
        }
        lease.mul_f64(self.renewal_fraction)
    }
}

/// Per-fetch parameters. Built fresh by the View for every call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QueryOptions {
    /// Last observed change token; 0 on the first fetch
    pub wait_index: u64,
    /// Upper bound for a server-side blocking read
    pub wait_time: Option<Duration>,
    /// Let any store replica answer, at the cost of staleness
    pub allow_stale: bool,
    pub lease: LeasePolling,
}

impl QueryOptions {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            wait_index: 0,
            wait_time: Some(config.block_wait()),
            allow_stale: config.max_stale().is_some(),
            lease: LeasePolling {
                renewal_fraction: config.lease_renewal_fraction,
                default_lease_duration: config.default_lease_duration(),
            },
        }
    }

    pub fn with_wait_index(
        self,
        wait_index: u64,
    ) -> Self {
        Self { wait_index, ..self }
    }

    pub fn with_stale(
        self,
        allow_stale: bool,
    ) -> Self {
        Self { allow_stale, ..self }
    }
}

/// What the store reported alongside a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseMetadata {
    /// Change token, monotonic per query while the data is unchanged or grows
    pub last_index: u64,
    /// Time since the answering replica last heard from the store leader
    pub last_contact: Duration,
    pub known_leader: bool,
}

impl ResponseMetadata {
    pub fn with_index(last_index: u64) -> Self {
        Self {
            last_index,
            last_contact: Duration::ZERO,
            known_leader: true,
        }
    }

    pub fn is_stale(
        &self,
        max_stale: Duration,
    ) -> bool {
        self.last_contact > max_stale
    }
}
