//! Cross-process deduplication configuration
//!
//! When enabled, instances running the same query set elect one leader per
//! shareable query through the remote store's session/lock primitive. Only
//! the leader fetches; followers read the leader's published payload.
//!
//! ```toml
//! [dedup]
//! enabled = true
//! prefix = "mirror/dedup"
//! ttl_ms = 15000
//! ```

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEDUP_DEFAULT_PREFIX;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Store path under which locks and payloads are written
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Session TTL enforced by the store. Leaders renew every `ttl / 2`.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Leader identity written alongside payloads. Generated when unset.
    #[serde(default)]
    pub instance_name: Option<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: default_prefix(),
            ttl_ms: default_ttl_ms(),
            instance_name: None,
        }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Interval between session renewals and follower lock attempts
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis((self.ttl_ms / 2).max(1))
    }

    /// Prefix without surrounding slashes
    pub fn normalized_prefix(&self) -> &str {
        self.prefix.trim_matches('/')
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.normalized_prefix().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "dedup.prefix cannot be empty".into(),
            )));
        }

        // Store-side session TTLs below one second are rejected by most backends
        if self.ttl_ms < 1000 {
            return Err(Error::Config(ConfigError::Message(format!(
                "dedup.ttl_ms must be at least 1000, got {}",
                self.ttl_ms
            ))));
        }

        Ok(())
    }
}

fn default_prefix() -> String {
    DEDUP_DEFAULT_PREFIX.to_string()
}
fn default_ttl_ms() -> u64 {
    15_000
}
