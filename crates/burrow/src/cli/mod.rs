pub mod args;
pub mod handlers;

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("burrow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("File-based locks, safe writes and command queues for cooperating agents")
        .subcommand_required(true)
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Coordination root (default: $BURROW_ROOT or .burrow)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON for machine parsing"),
        )
        .subcommand(args::cmd_init())
        .subcommand(args::cmd_lock())
        .subcommand(args::cmd_read())
        .subcommand(args::cmd_write())
        .subcommand(args::cmd_backups())
        .subcommand(args::cmd_tx())
        .subcommand(args::cmd_queue())
}
