//! Best-effort multi-file transactions.
//!
//! Writes are staged under `transactions/<id>/` as numbered pairs
//! (`000000.json` record + `000000.data` content) and nothing is touched
//! until commit. Commit takes every target's file lock in path order, applies
//! all writes and releases the locks.
//!
//! Commit is not crash-safe: a process dying mid-apply leaves some targets
//! written and others not. There is no journal to replay.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    lock::{is_process_alive, ResourceLock},
    store::SafeFileStore,
    Error, Result,
};

const TX_PREFIX: &str = "tx-";

/// Hands out transactions over a store.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    tx_dir: PathBuf,
    store: SafeFileStore,
}

/// One pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWrite {
    pub path: PathBuf,
    pub content: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StagedRecord {
    path: PathBuf,
    staged_at: DateTime<Utc>,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub id: String,
    /// Distinct targets written, in the order they were applied.
    pub applied: Vec<PathBuf>,
}

/// A transaction directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenTransaction {
    pub id: String,
    pub pid: u32,
    pub staged: usize,
    pub owner_alive: bool,
}

/// An open transaction. Dropping it without committing rolls it back.
#[derive(Debug)]
pub struct Transaction<'a> {
    coordinator: &'a TransactionCoordinator,
    id: String,
    dir: PathBuf,
    staged: Vec<StagedWrite>,
    finished: bool,
}

fn pid_of(id: &str) -> Option<u32> {
    id.strip_prefix(TX_PREFIX)?
        .split_once('-')
        .and_then(|(pid, _)| pid.parse().ok())
}

impl TransactionCoordinator {
    #[must_use]
    pub fn new(tx_dir: impl Into<PathBuf>, store: SafeFileStore) -> Self {
        Self {
            tx_dir: tx_dir.into(),
            store,
        }
    }

    #[must_use]
    pub fn tx_dir(&self) -> &Path {
        &self.tx_dir
    }

    /// Start a transaction for the calling process.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed` if this process already has one open
    /// - `LockTimeout` if another thread of this process is beginning one
    /// - `Io` if the transaction directory cannot be created
    pub fn begin(&self) -> Result<Transaction<'_>> {
        fs::create_dir_all(&self.tx_dir).map_err(|e| {
            Error::io(
                format!("failed to create {}", self.tx_dir.display()),
                e,
            )
        })?;

        let pid = std::process::id();
        // Held across the check and the create so threads of one process
        // cannot both pass the check.
        let guard = self.store.lock_manager().lock(&format!("tx_{pid}"))?;
        if let Some(open) = self.open_transactions()?.into_iter().find(|tx| tx.pid == pid) {
            return Err(Error::TransactionFailed {
                id: open.id,
                reason: "this process already has an open transaction".to_string(),
            });
        }

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let id = format!("{TX_PREFIX}{pid}-{nanos}");
        let dir = self.tx_dir.join(&id);
        fs::create_dir(&dir)
            .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
        release_all(vec![guard]);

        tracing::debug!(tx = %id, "began transaction");
        Ok(Transaction {
            coordinator: self,
            id,
            dir,
            staged: Vec::new(),
            finished: false,
        })
    }

    /// Transaction directories currently on disk.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the transactions directory cannot be listed
    pub fn open_transactions(&self) -> Result<Vec<OpenTransaction>> {
        let entries = match fs::read_dir(&self.tx_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::io(
                    format!("failed to list {}", self.tx_dir.display()),
                    e,
                ))
            }
        };

        let mut open: Vec<OpenTransaction> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let id = entry.file_name().to_string_lossy().into_owned();
                let pid = pid_of(&id)?;
                let staged = fs::read_dir(entry.path())
                    .map(|records| {
                        records
                            .filter_map(std::result::Result::ok)
                            .filter(|r| r.path().extension().is_some_and(|ext| ext == "json"))
                            .count()
                    })
                    .unwrap_or(0);
                Some(OpenTransaction {
                    id,
                    pid,
                    staged,
                    owner_alive: is_process_alive(pid),
                })
            })
            .collect();
        open.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(open)
    }

    /// Remove transactions whose owning process has exited.
    ///
    /// Returns the removed ids.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a directory cannot be listed or removed
    pub fn recover_abandoned(&self) -> Result<Vec<String>> {
        self.open_transactions()?
            .into_iter()
            .filter(|tx| !tx.owner_alive)
            .map(|tx| {
                let dir = self.tx_dir.join(&tx.id);
                match fs::remove_dir_all(&dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(Error::io(
                            format!("failed to remove abandoned {}", dir.display()),
                            e,
                        ))
                    }
                }
                tracing::info!(tx = %tx.id, pid = tx.pid, "removed abandoned transaction");
                Ok(tx.id)
            })
            .collect()
    }
}

impl Transaction<'_> {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Writes staged so far, in staging order.
    #[must_use]
    pub fn staged(&self) -> &[StagedWrite] {
        &self.staged
    }

    /// Stage a write. No target is touched until commit.
    ///
    /// # Errors
    ///
    /// - `Validation` if `path` does not name a file
    /// - `Io` if the staged record cannot be persisted
    pub fn stage(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> Result<()> {
        let path = self.coordinator.store.resolve(path)?;
        let content = content.into();
        let index = self.staged.len();

        let record = StagedRecord {
            path: path.clone(),
            staged_at: Utc::now(),
        };
        let record_json = serde_json::to_vec_pretty(&record)
            .map_err(|e| Error::io("failed to encode staged record", io::Error::other(e)))?;

        let data_path = self.dir.join(format!("{index:06}.data"));
        fs::write(&data_path, &content)
            .map_err(|e| Error::io(format!("failed to stage {}", data_path.display()), e))?;
        let record_path = self.dir.join(format!("{index:06}.json"));
        fs::write(&record_path, record_json)
            .map_err(|e| Error::io(format!("failed to stage {}", record_path.display()), e))?;

        tracing::debug!(tx = %self.id, path = %path.display(), "staged write");
        self.staged.push(StagedWrite { path, content });
        Ok(())
    }

    /// Apply all staged writes as one unit.
    ///
    /// When a target's lock cannot be taken, every lock already held is
    /// released and no file is modified. The staging directory is removed
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns `TransactionFailed` on lock timeout or if applying a write
    /// fails; the reason names how many writes were applied.
    pub fn commit(mut self) -> Result<CommitReport> {
        let result = self.apply();
        self.discard();
        result
    }

    /// Discard all staged writes. Targets are never touched.
    pub fn rollback(mut self) {
        self.discard();
        tracing::info!(tx = %self.id, "rolled back transaction");
    }

    fn apply(&self) -> Result<CommitReport> {
        let store = &self.coordinator.store;

        // last staged content per path wins; BTreeMap yields path order
        let writes: BTreeMap<&Path, &[u8]> = self
            .staged
            .iter()
            .map(|write| (write.path.as_path(), write.content.as_slice()))
            .collect();

        let mut held: Vec<ResourceLock> = Vec::with_capacity(writes.len());
        for path in writes.keys() {
            match store.lock_target(path, None) {
                Ok(lock) => held.push(lock),
                Err(Error::LockTimeout { resource, .. }) => {
                    release_all(held);
                    return Err(self.failed(format!(
                        "could not lock {} ({resource}); nothing was written",
                        path.display()
                    )));
                }
                Err(e) => {
                    release_all(held);
                    return Err(e);
                }
            }
        }

        let total = writes.len();
        let mut applied = Vec::with_capacity(total);
        for (path, content) in &writes {
            if let Err(e) = store.install(path, content, None) {
                release_all(held);
                return Err(self.failed(format!(
                    "applied {} of {total} writes, then {}: {e}",
                    applied.len(),
                    path.display()
                )));
            }
            applied.push(path.to_path_buf());
        }

        release_all(held);
        for path in &applied {
            store.prune(path);
        }
        tracing::info!(tx = %self.id, writes = applied.len(), "committed transaction");
        Ok(CommitReport {
            id: self.id.clone(),
            applied,
        })
    }

    fn failed(&self, reason: String) -> Error {
        Error::TransactionFailed {
            id: self.id.clone(),
            reason,
        }
    }

    fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(tx = %self.id, "failed to remove staging directory: {e}");
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(tx = %self.id, "transaction dropped while open, rolling back");
            self.discard();
        }
    }
}

fn release_all(held: Vec<ResourceLock>) {
    for lock in held {
        let resource = lock.resource().to_string();
        if let Err(e) = lock.release() {
            tracing::warn!(resource, "failed to release transaction lock: {e}");
        }
    }
}
