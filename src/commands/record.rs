//! `procwatch record`: run the sampler in the foreground until Ctrl+C.

use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::process_monitor::{Metric, Monitor};
use crate::ui::{format_duration_ms, print_ranking, print_stats};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn execute(matches: &ArgMatches, mut config: Config) -> Result<()> {
    if let Some(&interval_ms) = matches.get_one::<u64>("interval") {
        config.sampling_interval_ms = interval_ms;
    }
    let duration = matches
        .get_one::<u64>("duration")
        .map(|&secs| Duration::from_secs(secs));
    let show_top = matches.get_one::<usize>("show-top").copied();
    let metric = matches
        .get_one::<Metric>("metric")
        .copied()
        .unwrap_or(Metric::CpuPercent);

    let monitor = Monitor::open(&config).context("Failed to open monitor")?;

    // Create shared cancellation flag
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let cancel_flag_clone = cancel_flag.clone();

    // Setup Ctrl+C handler
    ctrlc::set_handler(move || {
        println!();
        println!("{}", "Stop requested...".yellow().bold());
        println!("{}", "Finishing the current sampling iteration...".dimmed());
        cancel_flag_clone.store(true, Ordering::Relaxed);
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    println!(
        "{} {} every {}",
        "Recording to".cyan().bold(),
        config.data_path()?.display(),
        format_duration_ms(config.sampling_interval_ms)
    );
    println!("{}", "Press Ctrl+C to stop".dimmed());

    monitor
        .start(config.sampling_interval())
        .context("Failed to start sampler")?;

    let started = Instant::now();
    let finished = |started: Instant| {
        cancel_flag.load(Ordering::Relaxed)
            || duration.is_some_and(|limit| started.elapsed() >= limit)
    };

    match show_top {
        Some(n) => {
            // Blocks until each batch commits, so Ctrl+C lands within one interval
            let mut rankings = monitor.subscribe_top_n(metric, n);
            while !finished(started) {
                match rankings.next() {
                    Some(Ok(rows)) => print_ranking(metric, &rows),
                    Some(Err(err)) => log::warn!("Ranking query failed: {}", err),
                    None => break,
                }
            }
        }
        None => {
            while !finished(started) {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    monitor.stop().context("Failed to stop sampler")?;
    print_stats(&monitor.stats());

    Ok(())
}
