//! `burrow read`, `burrow write`, `burrow backups`

use std::{
    io::{self, Read, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context as _, Result};
use burrow_core::{store::BackupInfo, FileVersion, WriteOptions};
use clap::ArgMatches;
use serde::Serialize;

use super::{required_path, Context};
use crate::output::emit;

#[derive(Serialize)]
struct ReadOutput {
    path: PathBuf,
    content: String,
    version: FileVersion,
}

pub fn handle_read(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let store = ctx.burrow.store();
    let path = store.resolve(required_path(matches, "path")?)?;
    let snapshot = store.read_versioned(&path)?;

    if ctx.json {
        let output = ReadOutput {
            path,
            content: String::from_utf8_lossy(&snapshot.content).into_owned(),
            version: snapshot.version,
        };
        emit(true, &output, |_| String::new())?;
    } else {
        io::stdout()
            .lock()
            .write_all(&snapshot.content)
            .context("Failed to write to stdout")?;
    }
    Ok(0)
}

#[derive(Serialize)]
struct WriteOutput {
    path: PathBuf,
    bytes: usize,
    checked: bool,
}

pub fn handle_write(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let store = ctx.burrow.store();
    let path = store.resolve(required_path(matches, "path")?)?;

    let content = if matches.get_flag("stdin") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read content from stdin")?;
        buf
    } else {
        matches
            .get_one::<String>("content")
            .map(|content| content.as_bytes().to_vec())
            .ok_or_else(|| anyhow::anyhow!("no content given; pass CONTENT or --stdin"))?
    };

    let checked = !matches.get_flag("no-check") && store.settings().check_conflicts;
    let mut options = WriteOptions::new().with_check_conflicts(checked);
    if let Some(ms) = matches.get_one::<u64>("timeout-ms") {
        options = options.with_timeout(Duration::from_millis(*ms));
    }
    store.write(&path, &content, &options)?;

    let output = WriteOutput {
        path,
        bytes: content.len(),
        checked,
    };
    emit(ctx.json, &output, |o| {
        format!("Wrote {} bytes to {}", o.bytes, o.path.display())
    })?;
    Ok(0)
}

#[derive(Serialize)]
struct RestoreOutput<'a> {
    path: PathBuf,
    restored_from: &'a PathBuf,
}

pub fn handle_backups(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let store = ctx.burrow.store();
    let path = store.resolve(required_path(matches, "path")?)?;

    if let Some(backup) = matches.get_one::<PathBuf>("restore") {
        store.restore(&path, backup, &WriteOptions::new())?;
        let output = RestoreOutput {
            path,
            restored_from: backup,
        };
        emit(ctx.json, &output, |o| {
            format!(
                "Restored {} from {}",
                o.path.display(),
                o.restored_from.display()
            )
        })?;
        return Ok(0);
    }

    let backups = store.backups(&path)?;
    emit(ctx.json, &backups, |backups| render_backups(backups))?;
    Ok(0)
}

fn render_backups(backups: &[BackupInfo]) -> String {
    if backups.is_empty() {
        return "No backups".to_string();
    }
    backups
        .iter()
        .map(|b| {
            format!(
                "{}  {:>10} bytes  pid {}  {}",
                b.created_at.format("%Y-%m-%d %H:%M:%S%.6f"),
                b.size_bytes,
                b.pid,
                b.path.display()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
