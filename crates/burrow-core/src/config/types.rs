//! Configuration type definitions

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default coordination root, relative to the working directory.
pub const DEFAULT_ROOT: &str = ".burrow";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;
const DEFAULT_STALE_AFTER_SECS: u64 = 300;
const DEFAULT_BACKUP_RETENTION: usize = 5;

// ═══════════════════════════════════════════════════════════════════════════
// RESOLVED CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Root configuration structure
///
/// Loaded from defaults → global → root file → env vars → CLI flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub lock: LockConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backup_retention: usize,
    pub check_conflicts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            lock: LockConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backup_retention: DEFAULT_BACKUP_RETENTION,
            check_conflicts: true,
        }
    }
}

impl Config {
    /// Config rooted at `root` with every other value defaulted.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Merge a partially specified layer on top of this one.
    #[must_use]
    pub fn merge(self, layer: PartialConfig) -> Self {
        Self {
            root: layer.root.unwrap_or(self.root),
            lock: LockConfig {
                timeout_ms: layer.lock.timeout_ms.unwrap_or(self.lock.timeout_ms),
                retry_interval_ms: layer
                    .lock
                    .retry_interval_ms
                    .unwrap_or(self.lock.retry_interval_ms),
                stale_after_secs: layer
                    .lock
                    .stale_after_secs
                    .unwrap_or(self.lock.stale_after_secs),
            },
            store: StoreConfig {
                backup_retention: layer
                    .store
                    .backup_retention
                    .unwrap_or(self.store.backup_retention),
                check_conflicts: layer
                    .store
                    .check_conflicts
                    .unwrap_or(self.store.check_conflicts),
            },
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if any value is out of range
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::invalid_config("root cannot be empty"));
        }
        if self.lock.timeout_ms == 0 {
            return Err(Error::invalid_config("lock.timeout_ms must be > 0"));
        }
        if self.lock.retry_interval_ms == 0 || self.lock.retry_interval_ms >= self.lock.timeout_ms
        {
            return Err(Error::invalid_config(format!(
                "lock.retry_interval_ms ({}) must be > 0 and < lock.timeout_ms ({})",
                self.lock.retry_interval_ms, self.lock.timeout_ms
            )));
        }
        if self.lock.stale_after_secs == 0 {
            return Err(Error::invalid_config("lock.stale_after_secs must be > 0"));
        }
        Ok(())
    }
}

impl LockConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARTIAL LAYERS (one per config file)
// ═══════════════════════════════════════════════════════════════════════════

/// One configuration layer as written in a file; unset keys fall through.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub root: Option<PathBuf>,
    pub lock: PartialLockConfig,
    pub store: PartialStoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialLockConfig {
    pub timeout_ms: Option<u64>,
    pub retry_interval_ms: Option<u64>,
    pub stale_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialStoreConfig {
    pub backup_retention: Option<usize>,
    pub check_conflicts: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock.timeout(), Duration::from_secs(30));
        assert_eq!(config.lock.retry_interval(), Duration::from_millis(100));
        assert_eq!(config.lock.stale_after(), Duration::from_secs(300));
        assert_eq!(config.store.backup_retention, 5);
        assert!(config.store.check_conflicts);
    }

    #[test]
    fn test_merge_overrides_only_set_keys() {
        let layer = PartialConfig {
            lock: PartialLockConfig {
                timeout_ms: Some(500),
                ..PartialLockConfig::default()
            },
            ..PartialConfig::default()
        };
        let merged = Config::default().merge(layer);
        assert_eq!(merged.lock.timeout_ms, 500);
        assert_eq!(merged.lock.retry_interval_ms, DEFAULT_RETRY_INTERVAL_MS);
        assert_eq!(merged.root, PathBuf::from(DEFAULT_ROOT));
    }

    #[test]
    fn test_validate_rejects_retry_not_below_timeout() {
        let mut config = Config::default();
        config.lock.timeout_ms = 100;
        config.lock.retry_interval_ms = 100;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.lock.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.lock.stale_after_secs = 0;
        assert!(config.validate().is_err());

        let config = Config::with_root("");
        assert!(config.validate().is_err());
    }
}
