//! `burrow tx ...`

use std::{fs, path::PathBuf};

use anyhow::{Context as _, Result};
use burrow_core::Error;
use clap::ArgMatches;
use serde::Serialize;

use super::Context;
use crate::output::emit;

pub fn dispatch(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    match matches.subcommand() {
        Some(("apply", sub_m)) => handle_apply(ctx, sub_m),
        Some(("list", _)) => handle_list(ctx),
        Some(("recover", _)) => handle_recover(ctx),
        _ => anyhow::bail!("Unknown tx command. Run 'burrow tx --help' for usage."),
    }
}

/// Split `TARGET=SOURCE`.
fn parse_pair(raw: &str) -> Result<(PathBuf, PathBuf), Error> {
    match raw.split_once('=') {
        Some((target, source)) if !target.is_empty() && !source.is_empty() => {
            Ok((PathBuf::from(target), PathBuf::from(source)))
        }
        _ => Err(Error::validation(format!(
            "expected TARGET=SOURCE, got '{raw}'"
        ))),
    }
}

fn handle_apply(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let pairs = matches
        .get_many::<String>("writes")
        .into_iter()
        .flatten()
        .map(|raw| parse_pair(raw))
        .collect::<Result<Vec<_>, _>>()?;

    // Read every source before opening the transaction
    let writes = pairs
        .into_iter()
        .map(|(target, source)| {
            fs::read(&source)
                .with_context(|| format!("Failed to read {}", source.display()))
                .map(|content| (target, content))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut tx = ctx.burrow.transactions().begin()?;
    for (target, content) in writes {
        tx.stage(&target, content)?;
    }
    let report = tx.commit()?;

    emit(ctx.json, &report, |r| {
        format!("Committed {} ({} file(s))", r.id, r.applied.len())
    })?;
    Ok(0)
}

fn handle_list(ctx: &Context) -> Result<i32> {
    let open = ctx.burrow.transactions().open_transactions()?;
    emit(ctx.json, &open, |open| {
        if open.is_empty() {
            return "No open transactions".to_string();
        }
        open.iter()
            .map(|tx| {
                let owner = if tx.owner_alive { "alive" } else { "exited" };
                format!("{}  pid {} ({owner})  {} staged", tx.id, tx.pid, tx.staged)
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    Ok(0)
}

#[derive(Serialize)]
struct RecoverOutput {
    removed: Vec<String>,
}

fn handle_recover(ctx: &Context) -> Result<i32> {
    let output = RecoverOutput {
        removed: ctx.burrow.transactions().recover_abandoned()?,
    };
    emit(ctx.json, &output, |o| {
        format!("Removed {} abandoned transaction(s)", o.removed.len())
    })?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let (target, source) = parse_pair("notes.md=/tmp/draft.md").unwrap();
        assert_eq!(target, PathBuf::from("notes.md"));
        assert_eq!(source, PathBuf::from("/tmp/draft.md"));
        assert!(matches!(parse_pair("notes.md"), Err(Error::Validation(_))));
        assert!(parse_pair("=src").is_err());
        assert!(parse_pair("dst=").is_err());
    }
}
