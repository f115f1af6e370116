//! CLI argument definitions and command builders
//!
//! Each function returns a configured `clap::Command` for one subcommand.

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn cmd_init() -> Command {
    Command::new("init")
        .about("Create the coordination root and a default config.toml")
        .long_about(
            "Create the Coordination Root\n\
             \n\
             CREATES:\n  \
             • <root>/locks/          - Lock claims\n  \
             • <root>/transactions/   - Staged transaction writes\n  \
             • <root>/queue/          - Per-agent command queues\n  \
             • <root>/config.toml     - Tunables (kept if present)\n\
             \n\
             SAFE TO RE-RUN:\n\
             Existing directories and config are left untouched.",
        )
}

pub fn cmd_lock() -> Command {
    Command::new("lock")
        .about("Inspect and use resource locks")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Hold a lock while running a command")
                .arg(resource_arg())
                .arg(timeout_arg())
                .arg(
                    Arg::new("command")
                        .required(true)
                        .num_args(1..)
                        .last(true)
                        .help("Command and arguments, after --"),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show the holder of one lock")
                .arg(resource_arg()),
        )
        .subcommand(Command::new("list").about("List all lock claims"))
        .subcommand(Command::new("sweep").about("Remove claims older than the staleness threshold"))
}

pub fn cmd_read() -> Command {
    Command::new("read")
        .about("Print a file's content under its lock")
        .arg(path_arg())
}

pub fn cmd_write() -> Command {
    Command::new("write")
        .about("Replace a file's content with conflict checking and backup")
        .arg(path_arg())
        .arg(
            Arg::new("content")
                .required_unless_present("stdin")
                .conflicts_with("stdin")
                .help("New content"),
        )
        .arg(
            Arg::new("stdin")
                .long("stdin")
                .action(ArgAction::SetTrue)
                .help("Read new content from standard input"),
        )
        .arg(
            Arg::new("no-check")
                .long("no-check")
                .action(ArgAction::SetTrue)
                .help("Skip optimistic conflict detection"),
        )
        .arg(timeout_arg())
}

pub fn cmd_backups() -> Command {
    Command::new("backups")
        .about("List or restore a file's backups")
        .arg(path_arg())
        .arg(
            Arg::new("restore")
                .long("restore")
                .value_parser(value_parser!(PathBuf))
                .help("Write this backup's content back to the file"),
        )
}

pub fn cmd_tx() -> Command {
    Command::new("tx")
        .about("Multi-file transactions")
        .subcommand_required(true)
        .subcommand(
            Command::new("apply")
                .about("Stage and commit several writes as one unit")
                .arg(
                    Arg::new("writes")
                        .required(true)
                        .num_args(1..)
                        .help("TARGET=SOURCE pairs; SOURCE is read from the working directory"),
                ),
        )
        .subcommand(Command::new("list").about("List open transactions"))
        .subcommand(Command::new("recover").about("Remove transactions of exited processes"))
}

pub fn cmd_queue() -> Command {
    Command::new("queue")
        .about("Per-agent priority command queues")
        .subcommand_required(true)
        .subcommand(
            Command::new("init")
                .about("Create an agent's queue")
                .arg(agent_arg()),
        )
        .subcommand(
            Command::new("enqueue")
                .about("Append a command")
                .arg(agent_arg())
                .arg(Arg::new("command").required(true).help("Command text"))
                .arg(
                    Arg::new("priority")
                        .long("priority")
                        .short('p')
                        .default_value("normal")
                        .value_parser(["high", "normal", "low"])
                        .help("Dequeue priority"),
                ),
        )
        .subcommand(
            Command::new("dequeue")
                .about("Remove and print the next command")
                .arg(agent_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Count pending commands (all agents when omitted)")
                .arg(Arg::new("agent").help("Agent identifier")),
        )
        .subcommand(
            Command::new("list")
                .about("Print pending commands in dequeue order")
                .arg(agent_arg()),
        )
}

fn resource_arg() -> Arg {
    Arg::new("resource").required(true).help("Resource name")
}

fn agent_arg() -> Arg {
    Arg::new("agent").required(true).help("Agent identifier")
}

fn path_arg() -> Arg {
    Arg::new("path")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("File path; relative paths are taken from the coordination root")
}

fn timeout_arg() -> Arg {
    Arg::new("timeout-ms")
        .long("timeout-ms")
        .value_parser(value_parser!(u64).range(1..))
        .help("Lock timeout in milliseconds (overrides config)")
}
