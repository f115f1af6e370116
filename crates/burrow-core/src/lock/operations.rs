//! Lock operations: claim creation, release, stale reclaim and sweeping.
//!
//! A claim is the directory `locks/<resource>.lock/`. `mkdir` either creates it
//! or fails with `AlreadyExists`, which makes it an atomic test-and-set across
//! unrelated processes. The holder record inside is informational.

use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant, SystemTime},
};

use super::queries::{
    resource_from_dir_name, stale_reason, validate_resource_name, validate_settings, LOCK_SUFFIX,
};
use super::types::{
    ClaimAttempt, LockAcquisition, LockInfo, LockManager, LockRecord, LockSettings, ResourceLock,
};
use crate::{Error, Result};

/// File inside a claim directory holding the [`LockRecord`].
const RECORD_FILE: &str = "holder.json";

/// Create the lock directory if it doesn't exist.
pub(super) fn create_lock_directory(lock_dir: &Path) -> Result<()> {
    fs::create_dir_all(lock_dir).map_err(|e| {
        Error::io(
            format!("failed to create lock directory {}", lock_dir.display()),
            e,
        )
    })
}

/// Read the holder record of a claim, if present and parseable.
pub(super) fn read_record(lock_path: &Path) -> Option<LockRecord> {
    fs::read_to_string(lock_path.join(RECORD_FILE))
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
}

/// Age of a claim: from its record, else from the directory's mtime.
fn claim_age(lock_path: &Path, record: Option<&LockRecord>) -> Duration {
    record.map_or_else(
        || {
            fs::metadata(lock_path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or(Duration::ZERO)
        },
        LockRecord::age,
    )
}

/// Single non-blocking attempt to create a claim.
fn try_claim(lock_dir: &Path, lock_path: &Path) -> Result<ClaimAttempt> {
    match fs::create_dir(lock_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(ClaimAttempt::Contended),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // locks/ itself was removed underneath us; recreate and retry once
            create_lock_directory(lock_dir)?;
            match fs::create_dir(lock_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Ok(ClaimAttempt::Contended)
                }
                Err(e) => return Err(claim_error(lock_path, e)),
            }
        }
        Err(e) => return Err(claim_error(lock_path, e)),
    }

    let record = LockRecord::current();
    let written = serde_json::to_vec(&record)
        .map_err(io::Error::other)
        .and_then(|bytes| fs::write(lock_path.join(RECORD_FILE), bytes));

    match written {
        Ok(()) => Ok(ClaimAttempt::Claimed(record)),
        Err(e) => {
            // Never leave a claim we cannot describe.
            let _ = fs::remove_dir_all(lock_path);
            Err(Error::io(
                format!("failed to write lock record in {}", lock_path.display()),
                e,
            ))
        }
    }
}

fn claim_error(lock_path: &Path, e: io::Error) -> Error {
    Error::io(format!("failed to create claim {}", lock_path.display()), e)
}

/// Marker in the name of a claim being reclaimed; such names never end in
/// the claim suffix, so they are invisible to acquisition and listing.
const TOMBSTONE_MARKER: &str = ".reclaim.";

/// Remove a claim if it still carries the record that was judged stale.
///
/// Returns `true` if the claim is gone afterwards.
fn reclaim(lock_path: &Path, observed: Option<&LockRecord>) -> Result<bool> {
    if read_record(lock_path).as_ref() != observed {
        return Ok(false);
    }
    retire_claim(lock_path, observed)
}

/// Move the claim aside, then delete it only if the moved claim still holds
/// `observed`.
///
/// Another waiter may have reclaimed and re-acquired the resource after the
/// caller looked. Renaming first means the record is checked on the exact
/// directory that will be deleted; a fresh claim found that way is moved
/// back.
fn retire_claim(lock_path: &Path, observed: Option<&LockRecord>) -> Result<bool> {
    let tombstone = tombstone_path(lock_path);
    match fs::rename(lock_path, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(Error::io(
                format!("failed to move stale claim {} aside", lock_path.display()),
                e,
            ))
        }
    }

    if read_record(&tombstone).as_ref() != observed {
        if let Err(e) = fs::rename(&tombstone, lock_path) {
            tracing::warn!(
                claim = %lock_path.display(),
                "failed to put back a live claim taken for reclaim: {e}"
            );
            remove_tombstone(&tombstone)?;
        }
        return Ok(false);
    }

    remove_tombstone(&tombstone)?;
    Ok(true)
}

fn tombstone_path(lock_path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut name = lock_path.file_name().unwrap_or_default().to_os_string();
    name.push(format!("{TOMBSTONE_MARKER}{}.{nanos}", std::process::id()));
    lock_path.with_file_name(name)
}

fn remove_tombstone(tombstone: &Path) -> Result<()> {
    match fs::remove_dir_all(tombstone) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(
            format!("failed to remove stale claim {}", tombstone.display()),
            e,
        )),
    }
}

/// Remove a claim held by the caller.
///
/// `owns` decides whether the recorded holder is the caller.
pub(super) fn release_claim(
    lock_path: &Path,
    resource: &str,
    owns: impl Fn(&LockRecord) -> bool,
) -> Result<()> {
    match read_record(lock_path) {
        Some(record) if owns(&record) => {
            fs::remove_dir_all(lock_path).map_err(|e| {
                Error::io(format!("failed to release lock '{resource}'"), e)
            })?;
            tracing::debug!(resource, "released lock");
            Ok(())
        }
        other => Err(Error::LockNotOwned {
            resource: resource.to_string(),
            holder: other.map(|record| record.pid),
        }),
    }
}

impl LockManager {
    /// Create a lock manager over `lock_dir` and sweep expired claims.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the settings violate their invariants
    /// - `Io` if the lock directory cannot be created
    pub fn new(lock_dir: impl Into<PathBuf>, settings: LockSettings) -> Result<Self> {
        let lock_dir = lock_dir.into();
        validate_settings(&settings)?;
        create_lock_directory(&lock_dir)?;

        let manager = Self { lock_dir, settings };
        let swept = manager.sweep_stale()?;
        if swept > 0 {
            tracing::info!(swept, "removed expired lock claims");
        }
        Ok(manager)
    }

    /// Directory holding all claims.
    #[must_use]
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    #[must_use]
    pub const fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Claim directory for a resource name.
    #[must_use]
    pub fn lock_path(&self, resource: &str) -> PathBuf {
        self.lock_dir.join(format!("{resource}{LOCK_SUFFIX}"))
    }

    /// Acquire a lock using the manager's configured timeout and interval.
    ///
    /// # Errors
    ///
    /// Returns error only for invalid names and filesystem failures; a
    /// timeout is reported as [`LockAcquisition::Timeout`].
    pub fn acquire(&self, resource: &str) -> Result<LockAcquisition> {
        self.acquire_with(resource, self.settings.timeout, self.settings.retry_interval)
    }

    /// Acquire a lock, polling every `retry_interval` until `timeout`.
    ///
    /// On every poll the current claim is inspected; a claim whose holder is
    /// dead or which is older than the staleness threshold is removed and the
    /// claim retried immediately.
    ///
    /// # Errors
    ///
    /// - `Validation` for an invalid resource name
    /// - `InvalidConfig` for a zero timeout or retry interval
    /// - `Io` if the claim cannot be created or a stale claim removed
    pub fn acquire_with(
        &self,
        resource: &str,
        timeout: Duration,
        retry_interval: Duration,
    ) -> Result<LockAcquisition> {
        validate_resource_name(resource)?;
        if timeout.is_zero() || retry_interval.is_zero() {
            return Err(Error::invalid_config(
                "timeout and retry interval must be > 0",
            ));
        }

        let lock_path = self.lock_path(resource);
        let start = Instant::now();

        loop {
            if let ClaimAttempt::Claimed(record) = try_claim(&self.lock_dir, &lock_path)? {
                tracing::debug!(resource, pid = record.pid, "acquired lock");
                return Ok(LockAcquisition::Acquired(ResourceLock {
                    resource: resource.to_string(),
                    lock_path,
                    record,
                    released: false,
                }));
            }

            let holder = read_record(&lock_path);
            let age = claim_age(&lock_path, holder.as_ref());
            if let Some(reason) = stale_reason(holder.as_ref(), age, self.settings.stale_after) {
                if reclaim(&lock_path, holder.as_ref())? {
                    tracing::info!(resource, %reason, "reclaimed stale lock");
                    continue;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                tracing::debug!(resource, ?elapsed, "lock acquisition timed out");
                return Ok(LockAcquisition::Timeout {
                    waited: elapsed,
                    holder,
                });
            }
            thread::sleep(retry_interval.min(timeout - elapsed));
        }
    }

    /// Acquire, mapping a timeout to `LockTimeout`.
    ///
    /// # Errors
    ///
    /// Same as [`LockManager::acquire`], plus `LockTimeout`
    pub fn lock(&self, resource: &str) -> Result<ResourceLock> {
        self.acquire(resource)?.into_result(resource)
    }

    /// Run `f` while holding `resource`.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock cannot be acquired, or whatever `f`
    /// returns. A failed release after `f` succeeded is reported as well.
    pub fn with_lock<T>(&self, resource: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock(resource)?;
        let value = f()?;
        lock.release()?;
        Ok(value)
    }

    /// Release a lock held by this process.
    ///
    /// # Errors
    ///
    /// - `LockNotOwned` if the claim is missing or held by another process
    /// - `Io` if the claim cannot be removed
    pub fn release(&self, resource: &str) -> Result<()> {
        validate_resource_name(resource)?;
        let pid = std::process::id();
        release_claim(&self.lock_path(resource), resource, |record| {
            record.pid == pid
        })
    }

    /// Current holder of a resource, if claimed.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an invalid resource name
    pub fn holder(&self, resource: &str) -> Result<Option<LockRecord>> {
        validate_resource_name(resource)?;
        Ok(read_record(&self.lock_path(resource)))
    }

    /// Whether a claim directory exists for `resource`.
    #[must_use]
    pub fn is_locked(&self, resource: &str) -> bool {
        self.lock_path(resource).is_dir()
    }

    /// All claims currently on disk, sorted by resource name.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the lock directory cannot be listed
    pub fn list(&self) -> Result<Vec<LockInfo>> {
        let mut infos: Vec<LockInfo> = self
            .claim_dirs()?
            .into_iter()
            .map(|(resource, lock_path)| {
                let record = read_record(&lock_path);
                let age = claim_age(&lock_path, record.as_ref());
                let stale = stale_reason(record.as_ref(), age, self.settings.stale_after);
                LockInfo {
                    resource,
                    record,
                    age,
                    stale,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.resource.cmp(&b.resource));
        Ok(infos)
    }

    /// Delete every claim older than the staleness threshold.
    ///
    /// Runs at construction; holders' own reclaim attempts cover dead
    /// processes in between sweeps.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the lock directory cannot be listed or a claim removed
    pub fn sweep_stale(&self) -> Result<usize> {
        let mut removed = 0;
        for (resource, lock_path) in self.claim_dirs()? {
            let record = read_record(&lock_path);
            let age = claim_age(&lock_path, record.as_ref());
            if age >= self.settings.stale_after && reclaim(&lock_path, record.as_ref())? {
                tracing::info!(resource, age_secs = age.as_secs(), "swept expired lock");
                removed += 1;
            }
        }
        for tombstone in self.leftover_tombstones()? {
            if claim_age(&tombstone, None) >= self.settings.stale_after {
                remove_tombstone(&tombstone)?;
                tracing::debug!(tombstone = %tombstone.display(), "removed abandoned reclaim");
            }
        }
        Ok(removed)
    }

    /// Claims moved aside by a reclaim that never finished.
    fn leftover_tombstones(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.lock_dir).map_err(|e| {
            Error::io(
                format!("failed to list lock directory {}", self.lock_dir.display()),
                e,
            )
        })?;
        Ok(entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .contains(TOMBSTONE_MARKER)
            })
            .map(|entry| entry.path())
            .collect())
    }

    fn claim_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let entries = fs::read_dir(&self.lock_dir).map_err(|e| {
            Error::io(
                format!("failed to list lock directory {}", self.lock_dir.display()),
                e,
            )
        })?;

        Ok(entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                resource_from_dir_name(&name).map(|resource| (resource.to_string(), entry.path()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn quick_settings() -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(20),
            stale_after: Duration::from_secs(60),
        }
    }

    fn manager(dir: &TempDir) -> Result<LockManager> {
        LockManager::new(dir.path().join("locks"), quick_settings())
    }

    fn tempdir() -> Result<TempDir> {
        TempDir::new().map_err(|e| Error::io("failed to create temp dir", e))
    }

    #[test]
    fn test_manager_creation_validates_settings() -> Result<()> {
        let dir = tempdir()?;
        let result = LockManager::new(
            dir.path().join("locks"),
            LockSettings {
                timeout: Duration::ZERO,
                ..quick_settings()
            },
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_acquire_writes_record_and_release_removes_claim() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;

        let lock = manager.lock("write_notes")?;
        assert!(lock.lock_path().join(RECORD_FILE).is_file());
        assert_eq!(lock.record().pid, std::process::id());
        assert_eq!(
            manager.holder("write_notes")?.map(|r| r.pid),
            Some(std::process::id())
        );

        lock.release()?;
        assert!(!manager.is_locked("write_notes"));
        Ok(())
    }

    #[test]
    fn test_drop_releases_lock() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        {
            let _lock = manager.lock("scoped")?;
            assert!(manager.is_locked("scoped"));
        }
        assert!(!manager.is_locked("scoped"));
        Ok(())
    }

    #[test]
    fn test_contended_acquire_times_out() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let _held = manager.lock("busy")?;

        let result = manager.acquire("busy")?;
        match result {
            LockAcquisition::Timeout { waited, holder } => {
                assert!(waited >= Duration::from_millis(200));
                assert_eq!(holder.map(|r| r.pid), Some(std::process::id()));
            }
            LockAcquisition::Acquired(_) => {
                return Err(Error::validation("lock should have been busy"));
            }
        }
        Ok(())
    }

    #[test]
    fn test_release_of_missing_lock_is_not_owned() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        assert!(matches!(
            manager.release("never-taken"),
            Err(Error::LockNotOwned { holder: None, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_release_of_foreign_lock_is_not_owned() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let lock_path = manager.lock_path("foreign");
        fs::create_dir_all(&lock_path).map_err(|e| Error::io("mkdir", e))?;
        let record = LockRecord {
            pid: 1,
            acquired_at: chrono::Utc::now(),
        };
        fs::write(
            lock_path.join(RECORD_FILE),
            serde_json::to_vec(&record).map_err(|e| Error::validation(e.to_string()))?,
        )
        .map_err(|e| Error::io("write", e))?;

        assert!(matches!(
            manager.release("foreign"),
            Err(Error::LockNotOwned {
                holder: Some(1),
                ..
            })
        ));
        assert!(manager.is_locked("foreign"));
        Ok(())
    }

    #[test]
    fn test_expired_claim_is_reclaimed_by_waiter() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let lock_path = manager.lock_path("old");
        fs::create_dir_all(&lock_path).map_err(|e| Error::io("mkdir", e))?;
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now() - chrono::Duration::seconds(120),
        };
        fs::write(
            lock_path.join(RECORD_FILE),
            serde_json::to_vec(&record).map_err(|e| Error::validation(e.to_string()))?,
        )
        .map_err(|e| Error::io("write", e))?;

        let lock = manager.lock("old")?;
        assert!(lock.record().acquired_at > record.acquired_at);
        Ok(())
    }

    #[test]
    fn test_sweep_removes_only_expired_claims() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let _fresh = manager.lock("fresh")?;

        let lock_path = manager.lock_path("ancient");
        fs::create_dir_all(&lock_path).map_err(|e| Error::io("mkdir", e))?;
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now() - chrono::Duration::seconds(3600),
        };
        fs::write(
            lock_path.join(RECORD_FILE),
            serde_json::to_vec(&record).map_err(|e| Error::validation(e.to_string()))?,
        )
        .map_err(|e| Error::io("write", e))?;

        assert_eq!(manager.sweep_stale()?, 1);
        assert!(manager.is_locked("fresh"));
        assert!(!manager.is_locked("ancient"));
        Ok(())
    }

    fn plant(lock_path: &Path, record: &LockRecord) -> Result<()> {
        fs::create_dir_all(lock_path).map_err(|e| Error::io("mkdir", e))?;
        fs::write(
            lock_path.join(RECORD_FILE),
            serde_json::to_vec(record).map_err(|e| Error::validation(e.to_string()))?,
        )
        .map_err(|e| Error::io("write", e))
    }

    fn lock_dir_entries(manager: &LockManager) -> Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(manager.lock_dir())
            .map_err(|e| Error::io("list", e))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    #[test]
    fn test_retire_claim_puts_back_a_claim_that_changed_hands() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let lock_path = manager.lock_path("contested");

        // What a slow waiter saw before another waiter reclaimed and re-acquired
        let judged_stale = LockRecord {
            pid: 1,
            acquired_at: chrono::Utc::now() - chrono::Duration::seconds(600),
        };
        let fresh = LockRecord::current();
        plant(&lock_path, &fresh)?;

        assert!(!retire_claim(&lock_path, Some(&judged_stale))?);
        assert_eq!(read_record(&lock_path), Some(fresh));
        assert_eq!(lock_dir_entries(&manager)?, vec!["contested.lock".to_string()]);
        Ok(())
    }

    #[test]
    fn test_retire_claim_removes_the_observed_claim() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let lock_path = manager.lock_path("abandoned");
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now() - chrono::Duration::seconds(600),
        };
        plant(&lock_path, &record)?;

        assert!(retire_claim(&lock_path, Some(&record))?);
        assert!(lock_dir_entries(&manager)?.is_empty());
        assert!(retire_claim(&lock_path, Some(&record))?);
        Ok(())
    }

    #[test]
    fn test_sweep_removes_abandoned_tombstones() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let tombstone = manager
            .lock_dir()
            .join(format!("gone.lock{TOMBSTONE_MARKER}1.1"));
        fs::create_dir_all(&tombstone).map_err(|e| Error::io("mkdir", e))?;
        let old = filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(3600),
        );
        filetime::set_file_mtime(&tombstone, old).map_err(|e| Error::io("mtime", e))?;

        assert_eq!(manager.sweep_stale()?, 0);
        assert!(!tombstone.exists());
        assert!(manager.list()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_reports_claims() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let _a = manager.lock("b_second")?;
        let _b = manager.lock("a_first")?;

        let infos = manager.list()?;
        let names: Vec<&str> = infos.iter().map(|i| i.resource.as_str()).collect();
        assert_eq!(names, vec!["a_first", "b_second"]);
        assert!(infos.iter().all(|i| i.stale.is_none()));
        Ok(())
    }

    #[test]
    fn test_with_lock_runs_closure_and_releases() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        let value = manager.with_lock("closure", || {
            assert!(manager.is_locked("closure"));
            Ok(7)
        })?;
        assert_eq!(value, 7);
        assert!(!manager.is_locked("closure"));
        Ok(())
    }

    #[test]
    fn test_invalid_resource_name_rejected() -> Result<()> {
        let dir = tempdir()?;
        let manager = manager(&dir)?;
        assert!(matches!(
            manager.acquire("../escape"),
            Err(Error::Validation(_))
        ));
        Ok(())
    }
}
