use anyhow::{bail, Result};
use clap::ArgMatches;
use colored::*;

use crate::core::process_monitor::ProcessAction;
use crate::platform::apply_process_action;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let Some(&pid) = matches.get_one::<u32>("pid") else {
        bail!("A PID is required");
    };
    let kind = matches
        .get_one::<String>("kind")
        .map(|s| s.as_str())
        .unwrap_or("terminate");

    let action = match kind {
        "terminate" => ProcessAction::Terminate,
        "suspend" => ProcessAction::Suspend,
        "resume" => ProcessAction::Resume,
        "priority" => match matches.get_one::<i32>("nice") {
            Some(&nice) => ProcessAction::SetPriority(nice),
            None => bail!("'priority' needs --nice <N>"),
        },
        other => bail!("Unknown action '{}'", other),
    };

    apply_process_action(pid, action)?;
    println!(
        "{} {} sent to PID {}",
        "✓".green().bold(),
        action,
        pid
    );

    Ok(())
}
