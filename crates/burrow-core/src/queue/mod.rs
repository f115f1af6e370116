//! Per-agent priority command queues.
//!
//! Each agent owns `queue/<agent>/` holding a `.sequence` counter and one
//! JSON file per pending command named `cmd_<rank>_<sequence:010>`. Sorting
//! the names gives dequeue order: priority first, then arrival.
//!
//! Producers serialize on `queue_seq_<agent>` to draw sequence numbers;
//! consumers serialize on `queue_<agent>`. A producer only ever adds a file
//! whose name sorts after every name drawn before it at the same priority,
//! so the two locks never need to be held together.

mod entry;

use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

use itertools::Itertools;

pub use entry::{
    entry_name, parse_entry_name, CommandStatus, Priority, QueueStats, QueuedCommand,
};

use crate::{
    lock::{validate_component, LockManager, MAX_RESOURCE_LEN},
    Error, Result,
};

const SEQUENCE_FILE: &str = ".sequence";
const SEQUENCE_LOCK_PREFIX: &str = "queue_seq_";
const CONSUMER_LOCK_PREFIX: &str = "queue_";

/// Longest agent id whose queue lock names are still valid resource names.
pub const MAX_AGENT_LEN: usize = MAX_RESOURCE_LEN - SEQUENCE_LOCK_PREFIX.len();
const REJECTED_PREFIX: &str = ".rejected_";

/// Filesystem-backed command queues for all agents under one directory.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    queue_dir: PathBuf,
    locks: LockManager,
}

impl CommandQueue {
    #[must_use]
    pub fn new(queue_dir: impl Into<PathBuf>, locks: LockManager) -> Self {
        Self {
            queue_dir: queue_dir.into(),
            locks,
        }
    }

    #[must_use]
    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    /// Directory of one agent's queue.
    #[must_use]
    pub fn agent_dir(&self, agent: &str) -> PathBuf {
        self.queue_dir.join(agent)
    }

    /// Create the agent's queue directory and counter. Idempotent.
    ///
    /// # Errors
    ///
    /// - `Validation` for an invalid agent identifier
    /// - `Io` if the directory or counter cannot be created
    pub fn init(&self, agent: &str) -> Result<()> {
        validate_agent(agent)?;
        let dir = self.agent_dir(agent);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("failed to create queue {}", dir.display()), e))?;

        let counter = dir.join(SEQUENCE_FILE);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&counter)
        {
            Ok(mut file) => {
                file.write_all(b"0").map_err(|e| {
                    Error::io(format!("failed to initialise {}", counter.display()), e)
                })?;
                tracing::debug!(agent, "initialised queue");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::io(
                format!("failed to create {}", counter.display()),
                e,
            )),
        }
    }

    /// Append a command to the agent's queue.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if the sequence lock stays busy
    /// - `SequenceError` if the counter is unreadable or corrupt
    /// - `Io` if the entry cannot be written
    pub fn enqueue(
        &self,
        agent: &str,
        command: impl Into<String>,
        priority: Priority,
    ) -> Result<QueuedCommand> {
        self.init(agent)?;
        let dir = self.agent_dir(agent);

        let lock = self.locks.lock(&format!("{SEQUENCE_LOCK_PREFIX}{agent}"))?;
        let sequence = read_sequence(agent, &dir)?
            .checked_add(1)
            .ok_or_else(|| sequence_error(agent, "sequence counter overflowed"))?;
        write_atomic(&dir, SEQUENCE_FILE, sequence.to_string().as_bytes())?;

        let queued = QueuedCommand::new(sequence, priority, command);
        let json = serde_json::to_vec_pretty(&queued)
            .map_err(|e| Error::io("failed to encode command", io::Error::other(e)))?;
        write_atomic(&dir, &queued.entry_name(), &json)?;
        lock.release()?;

        tracing::debug!(agent, sequence, %priority, "enqueued command");
        Ok(queued)
    }

    /// Remove and return the next command, or `None` if the queue is empty.
    ///
    /// Entries that cannot be parsed are renamed to `.rejected_<name>` and
    /// skipped.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if the consumer lock stays busy
    /// - `Io` if the queue cannot be listed or an entry removed
    pub fn dequeue(&self, agent: &str) -> Result<Option<QueuedCommand>> {
        validate_agent(agent)?;
        let dir = self.agent_dir(agent);
        if !dir.is_dir() {
            return Ok(None);
        }

        let lock = self.locks.lock(&format!("{CONSUMER_LOCK_PREFIX}{agent}"))?;
        let mut next = None;
        for name in pending_entries(&dir)? {
            let path = dir.join(&name);
            match read_entry(&path) {
                Ok(Some(command)) => {
                    fs::remove_file(&path).map_err(|e| {
                        Error::io(format!("failed to remove entry {}", path.display()), e)
                    })?;
                    next = Some(command);
                    break;
                }
                // Removed underneath us by a non-participant
                Ok(None) => {}
                Err(reason) => reject_entry(agent, &dir, &name, &reason),
            }
        }
        lock.release()?;

        if let Some(command) = &next {
            tracing::debug!(agent, sequence = command.sequence, "dequeued command");
        }
        Ok(next)
    }

    /// Count pending commands per priority without locking.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the queue directory cannot be listed
    pub fn status(&self, agent: &str) -> Result<QueueStats> {
        validate_agent(agent)?;
        let dir = self.agent_dir(agent);
        if !dir.is_dir() {
            return Ok(QueueStats::default());
        }
        Ok(pending_entries(&dir)?
            .iter()
            .filter_map(|name| parse_entry_name(name))
            .fold(QueueStats::default(), |mut stats, (priority, _)| {
                stats.record(priority);
                stats
            }))
    }

    /// Pending commands in dequeue order, without locking.
    ///
    /// Entries that disappear or fail to parse while listing are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the queue directory cannot be listed
    pub fn list(&self, agent: &str) -> Result<Vec<QueuedCommand>> {
        validate_agent(agent)?;
        let dir = self.agent_dir(agent);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(pending_entries(&dir)?
            .iter()
            .filter_map(|name| read_entry(&dir.join(name)).ok().flatten())
            .collect())
    }

    /// Last sequence number assigned to `agent`.
    ///
    /// # Errors
    ///
    /// Returns `SequenceError` if the counter is missing or corrupt
    pub fn sequence(&self, agent: &str) -> Result<u64> {
        validate_agent(agent)?;
        read_sequence(agent, &self.agent_dir(agent))
    }

    /// Agents with an initialised queue, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the queue directory cannot be listed
    pub fn agents(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.queue_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::io(
                    format!("failed to list {}", self.queue_dir.display()),
                    e,
                ))
            }
        };

        Ok(entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().join(SEQUENCE_FILE).is_file())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .sorted()
            .collect())
    }
}

/// Agent ids are opaque keys; they only have to be usable as a directory
/// name and leave room for the queue lock prefixes.
fn validate_agent(agent: &str) -> Result<()> {
    validate_component("agent id", agent, MAX_AGENT_LEN)
}

fn sequence_error(agent: &str, reason: impl Into<String>) -> Error {
    Error::SequenceError {
        agent: agent.to_string(),
        reason: reason.into(),
    }
}

fn read_sequence(agent: &str, dir: &Path) -> Result<u64> {
    let path = dir.join(SEQUENCE_FILE);
    let raw = fs::read_to_string(&path)
        .map_err(|e| sequence_error(agent, format!("cannot read {}: {e}", path.display())))?;
    raw.trim()
        .parse()
        .map_err(|_| sequence_error(agent, format!("corrupt counter value '{}'", raw.trim())))
}

/// Names of pending entries in dequeue order.
fn pending_entries(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::io(format!("failed to list queue {}", dir.display()), e))?;

    Ok(entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            parse_entry_name(&name).map(|key| (key, name))
        })
        .sorted_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, name)| name)
        .collect())
}

/// Read one entry. `Ok(None)` if it vanished, `Err` with a reason if corrupt.
fn read_entry(path: &Path) -> std::result::Result<Option<QueuedCommand>, String> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| e.to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

fn reject_entry(agent: &str, dir: &Path, name: &str, reason: &str) {
    let rejected = dir.join(format!("{REJECTED_PREFIX}{name}"));
    tracing::warn!(agent, entry = name, reason, "moving unreadable queue entry aside");
    if let Err(e) = fs::rename(dir.join(name), &rejected) {
        tracing::warn!(agent, entry = name, "failed to move entry aside: {e}");
    }
}

/// Write `content` to `dir/name` via a hidden temporary file and rename.
fn write_atomic(dir: &Path, name: &str, content: &[u8]) -> Result<()> {
    let target = dir.join(name);
    let mut staged = tempfile::Builder::new()
        .prefix(".tmp_")
        .tempfile_in(dir)
        .map_err(|e| Error::io(format!("failed to stage {}", target.display()), e))?;
    staged
        .write_all(content)
        .map_err(|e| Error::io(format!("failed to stage {}", target.display()), e))?;
    staged
        .persist(&target)
        .map_err(|e| Error::io(format!("failed to write {}", target.display()), e.error))?;
    Ok(())
}
