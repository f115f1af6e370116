//! Command handlers
//!
//! The core is blocking, so a whole invocation runs on a blocking thread
//! while `main` keeps the async side free to notice Ctrl-C.

mod init;
mod lock;
mod queue;
mod store;
mod tx;

use std::path::PathBuf;

use anyhow::Result;
use burrow_core::{config::load_config, Burrow};
use clap::ArgMatches;

/// Everything a handler needs.
pub struct Context {
    pub burrow: Burrow,
    pub json: bool,
}

/// Run the matched command, returning the process exit code.
pub async fn dispatch(matches: ArgMatches) -> Result<i32> {
    tokio::task::spawn_blocking(move || run(&matches)).await?
}

fn run(matches: &ArgMatches) -> Result<i32> {
    let globals = leaf(matches);
    let config = load_config(globals.get_one::<PathBuf>("root").map(PathBuf::as_path))?;
    let ctx = Context {
        burrow: Burrow::open(config)?,
        json: globals.get_flag("json"),
    };

    match matches.subcommand() {
        Some(("init", _)) => init::handle_init(&ctx),
        Some(("lock", sub_m)) => lock::dispatch(&ctx, sub_m),
        Some(("read", sub_m)) => store::handle_read(&ctx, sub_m),
        Some(("write", sub_m)) => store::handle_write(&ctx, sub_m),
        Some(("backups", sub_m)) => store::handle_backups(&ctx, sub_m),
        Some(("tx", sub_m)) => tx::dispatch(&ctx, sub_m),
        Some(("queue", sub_m)) => queue::dispatch(&ctx, sub_m),
        _ => anyhow::bail!("Unknown command. Run 'burrow --help' for usage."),
    }
}

/// Deepest matched subcommand; global flags are visible there.
fn leaf(matches: &ArgMatches) -> &ArgMatches {
    let mut current = matches;
    while let Some((_, sub_m)) = current.subcommand() {
        current = sub_m;
    }
    current
}

/// Fetch a required string argument.
fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing required argument <{name}>"))
}

/// Fetch a required path argument.
fn required_path<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a PathBuf> {
    matches
        .get_one::<PathBuf>(name)
        .ok_or_else(|| anyhow::anyhow!("missing required argument <{name}>"))
}
