//! `burrow queue ...`

use std::str::FromStr;

use anyhow::Result;
use burrow_core::{queue::QueuedCommand, Error, Priority, QueueStats};
use clap::ArgMatches;
use serde::Serialize;

use super::{required, Context};
use crate::output::emit;

pub fn dispatch(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    match matches.subcommand() {
        Some(("init", sub_m)) => handle_init(ctx, sub_m),
        Some(("enqueue", sub_m)) => handle_enqueue(ctx, sub_m),
        Some(("dequeue", sub_m)) => handle_dequeue(ctx, sub_m),
        Some(("status", sub_m)) => handle_status(ctx, sub_m),
        Some(("list", sub_m)) => handle_list(ctx, sub_m),
        _ => anyhow::bail!("Unknown queue command. Run 'burrow queue --help' for usage."),
    }
}

fn render_command(command: &QueuedCommand) -> String {
    format!(
        "#{} [{}] {}",
        command.sequence, command.priority, command.command
    )
}

#[derive(Serialize)]
struct InitOutput<'a> {
    agent: &'a str,
    sequence: u64,
}

fn handle_init(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let agent = required(matches, "agent")?;
    let queue = ctx.burrow.queue();
    queue.init(agent)?;
    let output = InitOutput {
        agent,
        sequence: queue.sequence(agent)?,
    };
    emit(ctx.json, &output, |o| {
        format!("Queue for {} ready (last sequence {})", o.agent, o.sequence)
    })?;
    Ok(0)
}

fn handle_enqueue(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let agent = required(matches, "agent")?;
    let command = required(matches, "command")?;
    let priority = matches
        .get_one::<String>("priority")
        .map_or(Ok(Priority::default()), |raw| {
            Priority::from_str(raw)
                .map_err(|_| Error::validation(format!("unknown priority '{raw}'")))
        })?;

    let queued = ctx.burrow.queue().enqueue(agent, command, priority)?;
    emit(ctx.json, &queued, |q| format!("Queued {}", render_command(q)))?;
    Ok(0)
}

fn handle_dequeue(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let agent = required(matches, "agent")?;
    let next = ctx.burrow.queue().dequeue(agent)?;
    emit(ctx.json, &next, |next| {
        next.as_ref()
            .map_or_else(|| format!("Queue for {agent} is empty"), render_command)
    })?;
    Ok(0)
}

#[derive(Serialize)]
struct AgentStats {
    agent: String,
    #[serde(flatten)]
    stats: QueueStats,
}

fn handle_status(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let queue = ctx.burrow.queue();
    let agents = match matches.get_one::<String>("agent") {
        Some(agent) => vec![agent.clone()],
        None => queue.agents()?,
    };
    let rows = agents
        .into_iter()
        .map(|agent| {
            queue
                .status(&agent)
                .map(|stats| AgentStats { agent, stats })
        })
        .collect::<Result<Vec<_>, _>>()?;

    emit(ctx.json, &rows, |rows| {
        if rows.is_empty() {
            return "No queues".to_string();
        }
        rows.iter()
            .map(|row| {
                format!(
                    "{:<24} total {:>4}  high {:>4}  normal {:>4}  low {:>4}",
                    row.agent, row.stats.total, row.stats.high, row.stats.normal, row.stats.low
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    Ok(0)
}

fn handle_list(ctx: &Context, matches: &ArgMatches) -> Result<i32> {
    let agent = required(matches, "agent")?;
    let pending = ctx.burrow.queue().list(agent)?;
    emit(ctx.json, &pending, |pending| {
        if pending.is_empty() {
            return format!("Queue for {agent} is empty");
        }
        pending
            .iter()
            .map(render_command)
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    Ok(0)
}
