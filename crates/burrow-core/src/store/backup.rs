//! Timestamped sibling backups and their retention.
//!
//! A backup of `notes.md` is `notes.md.backup.<YYYYMMDDTHHMMSSffffffZ>.<pid>`
//! in the same directory. The fixed-width timestamp makes lexical order the
//! creation order.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::{Error, Result};

const BACKUP_MARKER: &str = ".backup.";
const SECONDS_FORMAT: &str = "%Y%m%dT%H%M%S";

/// One backup snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Process that wrote the backup.
    pub pid: u32,
    pub size_bytes: u64,
}

/// Backup file name for `file_name` taken at `at` by `pid`.
#[must_use]
pub fn backup_file_name(file_name: &str, at: &DateTime<Utc>, pid: u32) -> String {
    format!(
        "{file_name}{BACKUP_MARKER}{}{:06}Z.{pid}",
        at.format(SECONDS_FORMAT),
        at.timestamp_subsec_micros()
    )
}

/// Parse the timestamp and pid out of a backup name belonging to `file_name`.
#[must_use]
pub fn parse_backup_name(file_name: &str, candidate: &str) -> Option<(DateTime<Utc>, u32)> {
    let rest = candidate
        .strip_prefix(file_name)?
        .strip_prefix(BACKUP_MARKER)?;
    let (stamp, pid) = rest.split_once('.')?;
    let pid = pid.parse().ok()?;

    let stamp = stamp.strip_suffix('Z')?;
    // 15 chars of `%Y%m%dT%H%M%S` followed by 6 digits of microseconds
    if stamp.len() != 21 || !stamp.is_char_boundary(15) {
        return None;
    }
    let (seconds, micros) = stamp.split_at(15);
    let seconds = NaiveDateTime::parse_from_str(seconds, SECONDS_FORMAT).ok()?;
    let micros: u32 = micros.parse().ok()?;
    let at = seconds.and_utc() + chrono::Duration::microseconds(i64::from(micros));
    Some((at, pid))
}

/// Copy the current content of `target` into a new backup.
///
/// Returns `None` when there is nothing to back up.
///
/// # Errors
///
/// Returns `Io` if the copy fails
pub fn create_backup(target: &Path) -> Result<Option<PathBuf>> {
    if !target.is_file() {
        return Ok(None);
    }
    let (dir, file_name) = split_target(target)?;
    let backup_path = dir.join(backup_file_name(
        &file_name,
        &Utc::now(),
        std::process::id(),
    ));

    fs::copy(target, &backup_path).map_err(|e| {
        Error::io(
            format!("failed to back up {} to {}", target.display(), backup_path.display()),
            e,
        )
    })?;
    tracing::debug!(backup = %backup_path.display(), "created backup");
    Ok(Some(backup_path))
}

/// All backups of `target`, oldest first.
///
/// # Errors
///
/// Returns `Io` if the parent directory exists but cannot be listed
pub fn list_backups(target: &Path) -> Result<Vec<BackupInfo>> {
    let (dir, file_name) = split_target(target)?;
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::io(
                format!("failed to list backups in {}", dir.display()),
                e,
            ))
        }
    };

    let mut backups: Vec<BackupInfo> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let (created_at, pid) = parse_backup_name(&file_name, &name)?;
            let metadata = entry.metadata().ok().filter(fs::Metadata::is_file)?;
            Some(BackupInfo {
                path: entry.path(),
                created_at,
                pid,
                size_bytes: metadata.len(),
            })
        })
        .collect();

    backups.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(backups)
}

/// Delete the oldest backups of `target` beyond `keep`.
///
/// Returns the removed paths.
///
/// # Errors
///
/// Returns `Io` if the backups cannot be listed or one cannot be removed
pub fn prune_backups(target: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let backups = list_backups(target)?;
    let excess = backups.len().saturating_sub(keep);

    backups
        .into_iter()
        .take(excess)
        .map(|backup| match fs::remove_file(&backup.path) {
            Ok(()) => Ok(backup.path),
            // A concurrent pruner got there first
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(backup.path),
            Err(e) => Err(Error::io(
                format!("failed to remove backup {}", backup.path.display()),
                e,
            )),
        })
        .collect()
}

fn split_target(target: &Path) -> Result<(PathBuf, String)> {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::validation(format!("{} has no file name", target.display())))?;
    let dir = target
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok((dir, file_name))
}
