//! The coordination root and its directory layout.
//!
//! ```text
//! <root>/
//!   config.toml          optional tunables
//!   locks/               <resource>.lock/holder.json
//!   transactions/        <txId>/<NNNNNN>.{json,data}
//!   queue/               <agent>/.sequence, <agent>/cmd_<rank>_<seq>
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    config::Config,
    lock::{LockManager, LockSettings},
    queue::CommandQueue,
    store::{SafeFileStore, StoreSettings},
    transaction::TransactionCoordinator,
    Error, Result,
};

pub const LOCKS_DIR: &str = "locks";
pub const TRANSACTIONS_DIR: &str = "transactions";
pub const QUEUE_DIR: &str = "queue";

/// Every coordination component, wired to one root directory.
#[derive(Debug, Clone)]
pub struct Burrow {
    config: Config,
    locks: LockManager,
    store: SafeFileStore,
    transactions: TransactionCoordinator,
    queue: CommandQueue,
}

impl Burrow {
    /// Open (creating if needed) the coordination root named by `config`.
    ///
    /// Construction sweeps expired lock claims.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the configuration does not validate
    /// - `Io` if the root layout cannot be created
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let root = config.root.clone();
        for dir in [LOCKS_DIR, TRANSACTIONS_DIR, QUEUE_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| {
                Error::io(
                    format!("failed to create coordination directory {}", path.display()),
                    e,
                )
            })?;
        }

        let locks = LockManager::new(root.join(LOCKS_DIR), LockSettings::from(&config.lock))?;
        let store = SafeFileStore::new(&root, locks.clone(), StoreSettings::from(&config.store));
        let transactions = TransactionCoordinator::new(root.join(TRANSACTIONS_DIR), store.clone());
        let queue = CommandQueue::new(root.join(QUEUE_DIR), locks.clone());

        tracing::debug!(root = %root.display(), "opened coordination root");
        Ok(Self {
            config,
            locks,
            store,
            transactions,
            queue,
        })
    }

    /// Open `root` with default settings.
    ///
    /// # Errors
    ///
    /// Same as [`Burrow::open`]
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Config::with_root(root))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn locks(&self) -> &LockManager {
        &self.locks
    }

    #[must_use]
    pub const fn store(&self) -> &SafeFileStore {
        &self.store
    }

    #[must_use]
    pub const fn transactions(&self) -> &TransactionCoordinator {
        &self.transactions
    }

    #[must_use]
    pub const fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_open_creates_layout() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        let root = dir.path().join("coord");
        let burrow = Burrow::at(&root)?;
        assert_eq!(burrow.root(), root);
        for sub in [LOCKS_DIR, TRANSACTIONS_DIR, QUEUE_DIR] {
            assert!(root.join(sub).is_dir(), "{sub} missing");
        }
        Ok(())
    }

    #[test]
    fn test_open_rejects_invalid_config() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        let mut config = Config::with_root(dir.path());
        config.lock.retry_interval_ms = config.lock.timeout_ms;
        assert!(matches!(Burrow::open(config), Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_root_that_is_a_file_is_io_error() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        let file = dir.path().join("occupied");
        fs::write(&file, "x").map_err(|e| Error::io("write", e))?;
        assert!(matches!(Burrow::at(&file), Err(Error::Io { .. })));
        Ok(())
    }
}
