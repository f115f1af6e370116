//! Type definitions for the resource lock manager.

use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operations::release_claim;

/// Holder record written inside every claim directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process id of the holder.
    pub pid: u32,
    /// When the claim was created.
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// Record for the calling process, stamped now.
    #[must_use]
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    /// Age of the claim; zero if the clock went backwards.
    #[must_use]
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Snapshot of one claim on disk, as returned by [`LockManager::list`].
///
/// [`LockManager::list`]: super::LockManager::list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub resource: String,
    /// `None` while a holder is between `mkdir` and writing its record.
    pub record: Option<LockRecord>,
    #[serde(with = "duration_secs")]
    pub age: Duration,
    pub stale: Option<StaleReason>,
}

/// Why a claim may be reclaimed by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum StaleReason {
    /// The recorded holder process no longer exists.
    HolderDead { pid: u32 },
    /// The claim outlived the staleness threshold.
    Expired {
        #[serde(with = "duration_secs")]
        age: Duration,
    },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HolderDead { pid } => write!(f, "holder pid {pid} is gone"),
            Self::Expired { age } => write!(f, "claim is {}s old", age.as_secs()),
        }
    }
}

/// Timing knobs for acquisition.
///
/// # Invariants
///
/// - `timeout > Duration::ZERO`
/// - `Duration::ZERO < retry_interval < timeout`
/// - `stale_after > Duration::ZERO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub timeout: Duration,
    pub retry_interval: Duration,
    pub stale_after: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(300),
        }
    }
}

impl From<&crate::config::LockConfig> for LockSettings {
    fn from(config: &crate::config::LockConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retry_interval: config.retry_interval(),
            stale_after: config.stale_after(),
        }
    }
}

/// Filesystem-backed lock manager rooted at a `locks/` directory.
///
/// Cheap to clone; holds no state besides its directory and settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockManager {
    pub(super) lock_dir: PathBuf,
    pub(super) settings: LockSettings,
}

/// A held resource lock.
///
/// Dropping the guard releases the claim (best-effort, failures are logged).
/// Use [`ResourceLock::release`] to observe release errors.
#[derive(Debug)]
pub struct ResourceLock {
    pub(super) resource: String,
    pub(super) lock_path: PathBuf,
    pub(super) record: LockRecord,
    pub(super) released: bool,
}

impl ResourceLock {
    /// Name of the locked resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Claim directory backing this lock.
    #[must_use]
    pub fn lock_path(&self) -> &std::path::Path {
        &self.lock_path
    }

    /// Record written when the lock was acquired.
    #[must_use]
    pub const fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Release the lock now.
    ///
    /// # Errors
    ///
    /// - `LockNotOwned` if the claim was reclaimed by someone else meanwhile
    /// - `Io` if the claim directory cannot be removed
    pub fn release(mut self) -> crate::Result<()> {
        self.released = true;
        let expected = self.record.clone();
        release_claim(&self.lock_path, &self.resource, |record| record == &expected)
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let expected = self.record.clone();
        if let Err(e) = release_claim(&self.lock_path, &self.resource, |record| {
            record == &expected
        }) {
            tracing::warn!(resource = %self.resource, "failed to release lock on drop: {e}");
        }
    }
}

/// Result of an acquisition attempt. Contention is not an error.
#[derive(Debug)]
pub enum LockAcquisition {
    /// Lock successfully acquired
    Acquired(ResourceLock),
    /// The timeout elapsed while another holder kept the lock
    Timeout {
        waited: Duration,
        holder: Option<LockRecord>,
    },
}

impl LockAcquisition {
    /// Convert into the held lock, mapping a timeout to `LockTimeout`.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the acquisition timed out
    pub fn into_result(self, resource: &str) -> crate::Result<ResourceLock> {
        match self {
            Self::Acquired(lock) => Ok(lock),
            Self::Timeout { waited, .. } => Err(crate::Error::LockTimeout {
                resource: resource.to_string(),
                waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

/// Outcome of a single non-blocking claim attempt.
pub(super) enum ClaimAttempt {
    Claimed(LockRecord),
    Contended,
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
