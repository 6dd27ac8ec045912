use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Quiescence window applied before a render signal is emitted.
///
/// `min_ms` is the idle time that must pass without further changes;
/// `max_ms` bounds the total delay measured from the first change of a burst.
/// Both zero fires on every change.
///
/// ```toml
/// [wait]
/// min_ms = 2000
/// max_ms = 10000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitConfig {
    #[serde(default)]
    pub min_ms: u64,

    /// 0 with a non-zero `min_ms` means four times `min_ms`
    #[serde(default)]
    pub max_ms: u64,
}

impl WaitConfig {
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        if self.max_ms == 0 && self.min_ms > 0 {
            return Duration::from_millis(self.min_ms.saturating_mul(4));
        }
        Duration::from_millis(self.max_ms)
    }

    pub fn is_disabled(&self) -> bool {
        self.min_ms == 0 && self.max_ms == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_ms != 0 && self.max_ms < self.min_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "wait.max_ms ({}) must be >= wait.min_ms ({})",
                self.max_ms, self.min_ms
            ))));
        }
        Ok(())
    }
}
