//! Configuration management for the mirror engine.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod dedup;
mod query;
mod retry;
mod wait;
pub use dedup::*;
pub use query::*;
pub use retry::*;
pub use wait::*;

#[cfg(test)]
mod wait_test;

use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Main configuration container for the mirror engine
///
/// Combines all section configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables prefixed with `MIRROR__` (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct MirrorConfig {
    /// Retry policies per backend
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Quiescence window applied before render signals
    #[serde(default)]
    pub wait: WaitConfig,
    /// Blocking read, staleness and lease polling parameters
    #[serde(default)]
    pub query: QueryConfig,
    /// Cross-process deduplication
    #[serde(default)]
    pub dedup: DedupConfig,
}

impl Debug for MirrorConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MirrorConfig")
            .field("retry", &self.retry)
            .field("wait", &self.wait)
            .field("query", &self.query)
            .field("dedup", &self.dedup)
            .finish()
    }
}

impl MirrorConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `MIRROR__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so further overrides can be applied via
    /// `with_override_config()`. Callers MUST call `validate()` before use.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("MIRROR__WAIT__MIN_MS", "500");
    /// let cfg = MirrorConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        self.retry.validate()?;
        self.wait.validate()?;
        self.query.validate()?;
        self.dedup.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix("MIRROR")
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}
