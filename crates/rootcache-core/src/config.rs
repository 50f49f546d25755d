//! Cache configuration
//!
//! Loaded from TOML; every field has a default so partial files work:
//!
//! ```toml
//! cache_capacity_bytes = 67108864
//! time_to_idle_secs = 600
//! min_length_for_recoverable_tree = 4096
//! recovery = "serialize"
//! retrieve_fallback_to_reparse = true
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How evicted roots are brought back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// Parse the text again
    #[default]
    Reparse,
    /// Push roots to temporary storage on eviction and pull them back
    Serialize,
}

/// Configuration for the root cache and tree factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RootCacheConfig {
    /// Eviction cache budget, weighed in bytes of root text
    pub cache_capacity_bytes: u64,
    /// Evict roots not touched for this long
    pub time_to_idle_secs: Option<u64>,
    /// Roots shorter than this are held strongly and never evicted
    pub min_length_for_recoverable_tree: usize,
    /// Recovery strategy for new trees
    pub recovery: RecoveryMode,
    /// Reparse when storage has nothing for a tree instead of aborting
    pub retrieve_fallback_to_reparse: bool,
}

impl RootCacheConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With cache budget
    #[inline]
    #[must_use]
    pub fn with_capacity_bytes(mut self, bytes: u64) -> Self {
        self.cache_capacity_bytes = bytes;
        self
    }

    /// With idle expiry
    #[inline]
    #[must_use]
    pub fn with_time_to_idle(mut self, idle: Duration) -> Self {
        self.time_to_idle_secs = Some(idle.as_secs());
        self
    }

    /// With threshold below which trees are not recoverable
    #[inline]
    #[must_use]
    pub fn with_min_recoverable_length(mut self, length: usize) -> Self {
        self.min_length_for_recoverable_tree = length;
        self
    }

    /// With recovery mode
    #[inline]
    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    /// With or without reparse fallback for storage misses
    #[inline]
    #[must_use]
    pub fn with_retrieve_fallback(mut self, fallback: bool) -> Self {
        self.retrieve_fallback_to_reparse = fallback;
        self
    }

    /// Idle expiry as a duration
    #[must_use]
    pub fn time_to_idle(&self) -> Option<Duration> {
        self.time_to_idle_secs.map(Duration::from_secs)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or values are unusable
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Check values are usable
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity_bytes == 0 {
            return Err(ConfigError::Invalid(
                "cache_capacity_bytes must be greater than zero".to_string(),
            ));
        }
        if self.time_to_idle_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "time_to_idle_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RootCacheConfig {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: 64 * 1024 * 1024, // 64MB of root text
            time_to_idle_secs: None,
            min_length_for_recoverable_tree: 4 * 1024,
            recovery: RecoveryMode::Reparse,
            retrieve_fallback_to_reparse: true,
        }
    }
}
