//! Safe file store: locked reads and conflict-checked atomic writes.
//!
//! Every read and write of a path happens under the single lock
//! `file_<key>` derived from the resolved path, so readers never observe a
//! half-installed write. Writes are staged in a hidden temporary file next
//! to the target and renamed over it.
//!
//! # Conflict detection
//!
//! A checked write compares the file's [`FileVersion`] against a baseline
//! right before the rename. The baseline is either supplied by the caller
//! (usually from [`SafeFileStore::read_versioned`]) or taken when the write
//! started. Versions compare modification time at filesystem precision plus
//! length; two writes inside one timestamp tick with equal length are not
//! distinguishable.

pub mod backup;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use backup::BackupInfo;

use crate::{
    config::StoreConfig,
    lock::{LockManager, ResourceLock},
    Error, Result,
};

/// Longest slice of the sanitized path kept in a lock name.
const MAX_KEY_PREFIX: usize = 64;

/// Store-wide behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Backups kept per file; `0` disables backups.
    pub backup_retention: usize,
    /// Default for writes that don't choose explicitly.
    pub check_conflicts: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for StoreSettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            backup_retention: config.backup_retention,
            check_conflicts: config.check_conflicts,
        }
    }
}

/// Optimistic-concurrency snapshot of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileVersion {
    pub exists: bool,
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileVersion {
    /// Version of a path that does not exist.
    pub const MISSING: Self = Self {
        exists: false,
        modified: None,
        len: 0,
    };

    /// Current version of `path`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if metadata cannot be read for a reason other than absence
    pub fn of(path: &Path) -> Result<Self> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(Self {
                exists: true,
                modified: metadata.modified().ok(),
                len: metadata.len(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::MISSING),
            Err(e) => Err(Error::io(
                format!("failed to stat {}", path.display()),
                e,
            )),
        }
    }
}

/// Content read together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub content: Vec<u8>,
    pub version: FileVersion,
}

/// Per-write options.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Overrides the store's default when set.
    pub check_conflicts: Option<bool>,
    /// Baseline to compare against instead of the version at write start.
    pub expected: Option<FileVersion>,
    /// Lock timeout; the lock manager's default when unset.
    pub timeout: Option<Duration>,
}

impl WriteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_check_conflicts(mut self, check: bool) -> Self {
        self.check_conflicts = Some(check);
        self
    }

    /// Fail with `ConflictDetected` unless the file is still at `version`.
    ///
    /// Implies conflict checking.
    #[must_use]
    pub fn with_expected(mut self, version: FileVersion) -> Self {
        self.expected = Some(version);
        self.check_conflicts = Some(true);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Lock-guarded file access rooted at a directory.
#[derive(Debug, Clone)]
pub struct SafeFileStore {
    root: PathBuf,
    locks: LockManager,
    settings: StoreSettings,
}

/// Lock name guarding `path`.
///
/// Readable prefix of the path plus a hash of the whole path, so distinct
/// paths never share a lock even after sanitizing and truncation.
#[must_use]
pub fn file_lock_name(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let readable: String = raw
        .chars()
        .filter(|c| !matches!(c, '/' | '\\'))
        .take(MAX_KEY_PREFIX)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = Sha256::digest(raw.as_bytes());
    format!("file_{readable}-{}", &hex::encode(digest)[..16])
}

impl SafeFileStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, locks: LockManager, settings: StoreSettings) -> Self {
        Self {
            root: root.into(),
            locks,
            settings,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    #[must_use]
    pub const fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Resolve a caller path; relative paths are taken from the root.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty path or one without a file name
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || path.file_name().is_none() {
            return Err(Error::validation(format!(
                "'{}' does not name a file",
                path.display()
            )));
        }
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }

    /// Read the current content; a missing file reads as empty.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if the path's lock stays busy
    /// - `Io` if the file exists but cannot be read
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        self.read_versioned(path).map(|snapshot| snapshot.content)
    }

    /// Read the content as UTF-8.
    ///
    /// # Errors
    ///
    /// Same as [`SafeFileStore::read`], plus `Validation` for non-UTF-8 content
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        String::from_utf8(self.read(path)?)
            .map_err(|_| Error::validation(format!("{} is not valid UTF-8", path.display())))
    }

    /// Read content and version atomically with respect to writers.
    ///
    /// # Errors
    ///
    /// Same as [`SafeFileStore::read`]
    pub fn read_versioned(&self, path: impl AsRef<Path>) -> Result<Snapshot> {
        let target = self.resolve(path)?;
        let lock = self.lock_target(&target, None)?;

        let version = FileVersion::of(&target)?;
        let content = match fs::read(&target) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::io(
                    format!("failed to read {}", target.display()),
                    e,
                ))
            }
        };

        lock.release()?;
        Ok(Snapshot { content, version })
    }

    /// Current version without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns `Io` if metadata cannot be read
    pub fn version(&self, path: impl AsRef<Path>) -> Result<FileVersion> {
        FileVersion::of(&self.resolve(path)?)
    }

    /// Replace the content of `path`.
    ///
    /// Backs up the previous content, stages the new content and renames it
    /// into place under the path's lock. With conflict checking on, a
    /// version change since the baseline aborts the write and leaves the
    /// file untouched.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if the path's lock stays busy
    /// - `ConflictDetected` if the file changed since the baseline
    /// - `Io` if staging or renaming fails
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        options: &WriteOptions,
    ) -> Result<()> {
        let target = self.resolve(path)?;
        let lock = self.lock_target(&target, options.timeout)?;

        let check = options
            .check_conflicts
            .unwrap_or(self.settings.check_conflicts);
        let baseline = if check {
            Some(match options.expected {
                Some(expected) => expected,
                None => FileVersion::of(&target)?,
            })
        } else {
            None
        };

        self.install(&target, content.as_ref(), baseline)?;
        self.finish_write(&target, lock);
        tracing::debug!(path = %target.display(), checked = check, "wrote file");
        Ok(())
    }

    /// Release the lock of an installed write, then prune its backups.
    ///
    /// The new content is already in place, so a failed release is logged
    /// rather than reported as a failed write.
    pub(crate) fn finish_write(&self, target: &Path, lock: ResourceLock) {
        let resource = lock.resource().to_string();
        if let Err(e) = lock.release() {
            tracing::warn!(
                resource,
                path = %target.display(),
                "failed to release lock after write: {e}"
            );
        }
        self.prune(target);
    }

    /// Backups of `path`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be listed
    pub fn backups(&self, path: impl AsRef<Path>) -> Result<Vec<BackupInfo>> {
        backup::list_backups(&self.resolve(path)?)
    }

    /// Write a backup's content back through the normal write path.
    ///
    /// # Errors
    ///
    /// - `Validation` if `backup_path` is not a backup of `path`
    /// - any error of [`SafeFileStore::write`]
    pub fn restore(
        &self,
        path: impl AsRef<Path>,
        backup_path: &Path,
        options: &WriteOptions,
    ) -> Result<()> {
        let target = self.resolve(path)?;
        let belongs = self
            .backups(&target)?
            .iter()
            .any(|backup| backup.path == backup_path);
        if !belongs {
            return Err(Error::validation(format!(
                "{} is not a backup of {}",
                backup_path.display(),
                target.display()
            )));
        }

        let content = fs::read(backup_path).map_err(|e| {
            Error::io(format!("failed to read backup {}", backup_path.display()), e)
        })?;
        self.write(&target, content, options)?;
        tracing::info!(path = %target.display(), backup = %backup_path.display(), "restored backup");
        Ok(())
    }

    /// Acquire the lock guarding an already resolved target.
    pub(crate) fn lock_target(
        &self,
        target: &Path,
        timeout: Option<Duration>,
    ) -> Result<ResourceLock> {
        let name = file_lock_name(target);
        let settings = self.locks.settings();
        self.locks
            .acquire_with(
                &name,
                timeout.unwrap_or(settings.timeout),
                settings.retry_interval,
            )?
            .into_result(&name)
    }

    /// Back up, stage and rename `content` over `target`.
    ///
    /// The caller must hold the target's lock.
    pub(crate) fn install(
        &self,
        target: &Path,
        content: &[u8],
        baseline: Option<FileVersion>,
    ) -> Result<()> {
        let dir = target
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;

        if self.settings.backup_retention > 0 {
            if let Err(e) = backup::create_backup(target) {
                tracing::warn!(path = %target.display(), "backup failed, writing anyway: {e}");
            }
        }

        let staged = stage(&dir, target, content)?;

        if let Some(baseline) = baseline {
            if FileVersion::of(target)? != baseline {
                // dropping `staged` deletes the temporary file
                drop(staged);
                tracing::debug!(path = %target.display(), "conflict detected");
                return Err(Error::ConflictDetected {
                    path: target.to_path_buf(),
                });
            }
        }

        staged.persist(target).map_err(|e| {
            Error::io(
                format!("failed to move staged content over {}", target.display()),
                e.error,
            )
        })?;
        Ok(())
    }

    /// Enforce backup retention for `target`; failures are logged.
    pub(crate) fn prune(&self, target: &Path) {
        if self.settings.backup_retention == 0 {
            return;
        }
        match backup::prune_backups(target, self.settings.backup_retention) {
            Ok(removed) if !removed.is_empty() => {
                tracing::debug!(path = %target.display(), removed = removed.len(), "pruned backups");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(path = %target.display(), "failed to prune backups: {e}"),
        }
    }
}

/// Write `content` to a hidden temporary file in `dir`.
fn stage(dir: &Path, target: &Path, content: &[u8]) -> Result<tempfile::NamedTempFile> {
    let prefix = format!(
        ".{}.",
        target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let mut staged = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::io(format!("failed to stage write in {}", dir.display()), e))?;

    staged
        .write_all(content)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| Error::io(format!("failed to stage content for {}", target.display()), e))?;
    Ok(staged)
}
