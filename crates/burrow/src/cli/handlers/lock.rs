//! `burrow lock ...`

use std::{process::Command, time::Duration};

use anyhow::{Context as _, Result};
use burrow_core::lock::{LockInfo, LockRecord};
use clap::ArgMatches;
use serde::Serialize;

use super::{required, Context};
use crate::output::emit;

pub fn dispatch(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    match matches.subcommand() {
        Some(("run", sub_m)) => handle_run(ctx, sub_m),
        Some(("status", sub_m)) => handle_status(ctx, sub_m),
        Some(("list", _)) => handle_list(ctx),
        Some(("sweep", _)) => handle_sweep(ctx),
        _ => anyhow::bail!("Unknown lock command. Run 'burrow lock --help' for usage."),
    }
}

fn handle_run(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let resource = required(matches, "resource")?;
    let argv: Vec<&String> = matches
        .get_many::<String>("command")
        .map(Iterator::collect)
        .unwrap_or_default();
    let Some((program, args)) = argv.split_first() else {
        anyhow::bail!("missing command to run");
    };

    let locks = ctx.burrow.locks();
    let timeout = matches
        .get_one::<u64>("timeout-ms")
        .map_or(locks.settings().timeout, |ms| Duration::from_millis(*ms));
    let lock = locks
        .acquire_with(resource, timeout, locks.settings().retry_interval)?
        .into_result(resource)?;
    tracing::info!(resource, program = %program, "holding lock while command runs");

    let status = Command::new(program.as_str())
        .args(args.iter().map(|arg| arg.as_str()))
        .status()
        .with_context(|| format!("Failed to run '{program}'"));
    lock.release()?;

    // Signal-terminated children have no code
    Ok(status?.code().unwrap_or(1))
}

#[derive(Serialize)]
struct LockStatus<'a> {
    resource: &'a str,
    locked: bool,
    holder: Option<LockRecord>,
}

fn handle_status(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let resource = required(matches, "resource")?;
    let locks = ctx.burrow.locks();
    let status = LockStatus {
        resource,
        locked: locks.is_locked(resource),
        holder: locks.holder(resource)?,
    };
    emit(ctx.json, &status, |s| match (&s.holder, s.locked) {
        (Some(holder), _) => format!(
            "{} is held by pid {} since {}",
            s.resource,
            holder.pid,
            holder.acquired_at.to_rfc3339()
        ),
        (None, true) => format!("{} is being claimed", s.resource),
        (None, false) => format!("{} is free", s.resource),
    })?;
    Ok(0)
}

fn handle_list(ctx: &Context) -> Result<i32> {
    let infos = ctx.burrow.locks().list()?;
    emit(ctx.json, &infos, |infos| render_list(infos))?;
    Ok(0)
}

fn render_list(infos: &[LockInfo]) -> String {
    if infos.is_empty() {
        return "No locks held".to_string();
    }
    infos
        .iter()
        .map(|info| {
            let holder = info
                .record
                .as_ref()
                .map_or_else(|| "-".to_string(), |r| r.pid.to_string());
            let stale = info
                .stale
                .map(|reason| format!("  (stale: {reason})"))
                .unwrap_or_default();
            format!(
                "{:<40} pid {:<8} {:>6}s{stale}",
                info.resource,
                holder,
                info.age.as_secs()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct SweepOutput {
    removed: usize,
}

fn handle_sweep(ctx: &Context) -> Result<i32> {
    let output = SweepOutput {
        removed: ctx.burrow.locks().sweep_stale()?,
    };
    emit(ctx.json, &output, |o| {
        format!("Removed {} expired lock(s)", o.removed)
    })?;
    Ok(0)
}
