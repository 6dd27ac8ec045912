// -
// Remote store defaults

/// Upper bound for a single server-side blocking read when none is configured
pub(crate) const DEFAULT_BLOCKING_WAIT_MS: u64 = 60_000;

/// Lease duration assumed for secrets that report no lease (Vault style default)
pub(crate) const DEFAULT_LEASE_DURATION_MS: u64 = 300_000;

/// Fraction of the remaining lease a secret query sleeps before refetching
pub(crate) const DEFAULT_LEASE_RENEWAL_FRACTION: f64 = 0.5;

// -
// Dedup namespaces

/// Store path under which dedup locks and payloads live
pub(crate) const DEDUP_DEFAULT_PREFIX: &str = "mirror/dedup";

/// Leaf of the lock path: `<prefix>/<key>/lock`
pub(crate) const DEDUP_LOCK_LEAF: &str = "lock";

/// Leaf of the payload path: `<prefix>/<key>/data`
pub(crate) const DEDUP_DATA_LEAF: &str = "data";

/// Session name registered with the remote store
pub(crate) const DEDUP_SESSION_NAME: &str = "d-mirror-dedup";
