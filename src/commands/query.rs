//! Read-only commands over the sample store: top, series, aggregate,
//! summary and analyze.

use anyhow::{bail, Result};
use clap::ArgMatches;
use serde::Serialize;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::process_monitor::{now_millis, Metric, QueryEngine, TimeWindow, Timestamp};
use crate::ui::{print_analysis, print_buckets, print_ranking, print_series, print_summary};

use super::open_query_engine;

pub fn execute(name: &str, matches: &ArgMatches, config: &Config) -> Result<()> {
    let engine = open_query_engine(config)?;
    let json = matches.get_flag("json");

    match name {
        "top" => top(&engine, matches, json),
        "series" => series(&engine, matches, json),
        "aggregate" => aggregate(&engine, matches, config, json),
        "summary" => summary(&engine, matches, json),
        "analyze" => analyze(&engine, matches, json),
        other => bail!("Unknown query command '{}'", other),
    }
}

fn top(engine: &QueryEngine, matches: &ArgMatches, json: bool) -> Result<()> {
    let metric = matches
        .get_one::<Metric>("metric")
        .copied()
        .unwrap_or(Metric::CpuPercent);
    let n = matches.get_one::<usize>("count").copied().unwrap_or(10);
    let at = reference_time(engine)?;

    let rows = engine.top_n(metric, at, n)?;
    if json {
        return print_json(&rows);
    }
    print_ranking(metric, &rows);
    Ok(())
}

fn series(engine: &QueryEngine, matches: &ArgMatches, json: bool) -> Result<()> {
    let Some(&pid) = matches.get_one::<u32>("pid") else {
        bail!("--pid is required");
    };
    let window = window_from(engine, matches)?;

    let identities = engine.store().identities_by_pid(pid)?;
    let identity = match matches.get_one::<i64>("start-time") {
        Some(&start_time) => identities.into_iter().find(|id| id.start_time == start_time),
        // Most recent process to use this pid
        None => identities.into_iter().last(),
    };
    let Some(identity) = identity else {
        bail!("No samples recorded for PID {}", pid);
    };

    let samples = engine.series(&identity, window)?;
    if json {
        return print_json(&samples);
    }
    print_series(&samples);
    Ok(())
}

fn aggregate(engine: &QueryEngine, matches: &ArgMatches, config: &Config, json: bool) -> Result<()> {
    let window = window_from(engine, matches)?;
    let bucket_secs = matches.get_one::<u64>("bucket-secs").copied().unwrap_or(60);
    let metrics: Vec<Metric> = Metric::ALL
        .into_iter()
        .filter(|m| config.metrics_enabled.contains(&m.family()))
        .collect();

    let buckets =
        engine.system_aggregate_for(window, Duration::from_secs(bucket_secs), &metrics)?;
    if json {
        return print_json(&buckets);
    }
    print_buckets(&buckets);
    Ok(())
}

fn summary(engine: &QueryEngine, matches: &ArgMatches, json: bool) -> Result<()> {
    let window = window_from(engine, matches)?;

    let summary = engine.system_summary(window)?;
    if json {
        return print_json(&summary);
    }
    print_summary(&summary);
    Ok(())
}

fn analyze(engine: &QueryEngine, matches: &ArgMatches, json: bool) -> Result<()> {
    let Some(name) = matches.get_one::<String>("name") else {
        bail!("A process name is required");
    };
    let window = window_from(engine, matches)?;

    let analysis = engine.process_analysis(name, window)?;
    if json {
        return print_json(&analysis);
    }
    print_analysis(&analysis);
    Ok(())
}

/// Newest stored timestamp, so queries over an idle store still show data
fn reference_time(engine: &QueryEngine) -> Result<Timestamp> {
    Ok(engine.store().latest_timestamp()?.unwrap_or_else(now_millis))
}

fn window_from(engine: &QueryEngine, matches: &ArgMatches) -> Result<TimeWindow> {
    let minutes = matches.get_one::<u64>("minutes").copied().unwrap_or(60);
    let end = reference_time(engine)?;

    Ok(TimeWindow::ending_at(end, Duration::from_secs(minutes * 60)))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
