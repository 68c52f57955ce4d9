use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

use procwatch::commands;
use procwatch::core::process_monitor::Metric;

fn main() -> Result<()> {
    procwatch::init_logging();

    let matches = Command::new("procwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Samples process CPU, memory and disk usage into a local time-series store")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Config file to use instead of the default location")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("data")
                .long("data")
                .value_name("PATH")
                .help("Sample store file to use instead of the configured one")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .subcommand(
            Command::new("record")
                .about("Sample the process table until Ctrl+C")
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("MS")
                        .help("Sampling interval in milliseconds (overrides config)")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("duration")
                        .short('d')
                        .long("duration")
                        .value_name("SECS")
                        .help("Stop automatically after this many seconds")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("show-top")
                        .long("show-top")
                        .value_name("N")
                        .help("Print the top N processes after every batch")
                        .value_parser(value_parser!(usize)),
                )
                .arg(metric_arg()),
        )
        .subcommand(
            Command::new("top")
                .about("Rank processes by a metric at the newest stored sample")
                .arg(metric_arg())
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .value_name("N")
                        .help("Number of processes to show")
                        .default_value("10")
                        .value_parser(value_parser!(usize)),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("series")
                .about("Show the recorded samples of one process")
                .arg(
                    Arg::new("pid")
                        .short('p')
                        .long("pid")
                        .value_name("PID")
                        .help("Process ID")
                        .required(true)
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("start-time")
                        .long("start-time")
                        .value_name("UNIX_SECS")
                        .help("Process start time, to pick one of several processes that reused the PID")
                        .value_parser(value_parser!(i64)),
                )
                .arg(minutes_arg("10"))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("aggregate")
                .about("Show whole-host usage downsampled into time buckets")
                .arg(minutes_arg("60"))
                .arg(
                    Arg::new("bucket-secs")
                        .short('b')
                        .long("bucket-secs")
                        .value_name("SECS")
                        .help("Bucket width in seconds")
                        .default_value("60")
                        .value_parser(value_parser!(u64).range(1..)),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("summary")
                .about("Show mean and peak whole-host usage")
                .arg(minutes_arg("60"))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("analyze")
                .about("Show mean and peak usage of every process with a given name")
                .arg(
                    Arg::new("name")
                        .help("Exact process name")
                        .required(true)
                        .index(1),
                )
                .arg(minutes_arg("60"))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("action")
                .about("Terminate, suspend, resume or re-prioritize a process")
                .arg(
                    Arg::new("pid")
                        .help("Target process ID")
                        .required(true)
                        .index(1)
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("kind")
                        .help("Action to apply")
                        .required(true)
                        .index(2)
                        .value_parser(["terminate", "suspend", "resume", "priority"]),
                )
                .arg(
                    Arg::new("nice")
                        .long("nice")
                        .value_name("N")
                        .help("Nice value for 'priority' (-20 highest, 19 lowest)")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(i32)),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("record", sub_matches)) => {
            let config = commands::load_config(sub_matches)?;
            commands::record(sub_matches, config)?;
        }
        Some(("action", sub_matches)) => {
            commands::action(sub_matches)?;
        }
        Some((name, sub_matches)) => {
            let config = commands::load_config(sub_matches)?;
            commands::query::execute(name, sub_matches, &config)?;
        }
        None => {
            println!("Use 'procwatch --help' for more information.");
        }
    }

    Ok(())
}

fn metric_arg() -> Arg {
    Arg::new("metric")
        .short('m')
        .long("metric")
        .value_name("METRIC")
        .help("cpu, memory, disk-read or disk-write")
        .default_value("cpu")
        .value_parser(value_parser!(Metric))
}

fn minutes_arg(default: &'static str) -> Arg {
    Arg::new("minutes")
        .long("minutes")
        .value_name("MIN")
        .help("Length of the window ending at the newest sample")
        .default_value(default)
        .value_parser(value_parser!(u64))
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .help("Print JSON instead of a table")
        .action(ArgAction::SetTrue)
}
