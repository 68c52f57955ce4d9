use chrono::{DateTime, Local};
use colored::*;
use humansize::{format_size, DECIMAL};

use crate::core::process_monitor::{
    AggregateBucket, Metric, ProcessAnalysis, RankedRow, Sample, StatsSnapshot, SystemSummary,
    Timestamp,
};

/// Format a byte count in human-readable form (kB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

/// Format a Unix-millisecond timestamp in local time (YYYY-MM-DD HH:MM:SS)
pub fn format_timestamp(ts: Timestamp) -> String {
    match DateTime::from_timestamp_millis(ts) {
        Some(utc) => {
            let local: DateTime<Local> = utc.with_timezone(&Local);
            local.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        None => ts.to_string(),
    }
}

/// Format a span of milliseconds as `1d 2h`, `3h 4m`, `5m 6s` or `7s`
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_metric_value(metric: Metric, value: f64) -> String {
    match metric {
        Metric::CpuPercent => format!("{:.1}%", value),
        _ => format_bytes(value.max(0.0).round() as u64),
    }
}

fn cpu_colored(percent: f64) -> ColoredString {
    let text = format!("{:>7.1}%", percent);
    if percent >= 80.0 {
        text.red().bold()
    } else if percent >= 50.0 {
        text.yellow()
    } else {
        text.green()
    }
}

fn print_section_header(title: &str) {
    println!("\n{}", title.bold().green());
    println!("{}", "-".repeat(title.len()));
}

pub fn print_ranking(metric: Metric, rows: &[RankedRow]) {
    print_section_header(&format!("TOP PROCESSES BY {}", metric.as_str().to_uppercase()));

    if rows.is_empty() {
        println!("  {}", "No samples in range".dimmed());
        return;
    }

    println!(
        "  {:>4}  {:>8}  {:<28} {:>12}",
        "#".bold(),
        "PID".bold(),
        "NAME".bold(),
        metric.as_str().to_uppercase().bold()
    );
    for (rank, row) in rows.iter().enumerate() {
        let value = match metric {
            Metric::CpuPercent => cpu_colored(row.value).to_string(),
            _ => format_metric_value(metric, row.value).cyan().to_string(),
        };
        println!(
            "  {:>4}  {:>8}  {:<28} {:>12}",
            rank + 1,
            row.identity.pid,
            truncate(&row.identity.name, 28),
            value
        );
    }
}

pub fn print_series(samples: &[Sample]) {
    let Some(first) = samples.first() else {
        println!("  {}", "No samples in range".dimmed());
        return;
    };
    print_section_header(&format!("SERIES {}", first.identity));

    println!(
        "  {:<19}  {:>8}  {:>10}  {:>10}  {:>10}",
        "TIME".bold(),
        "CPU".bold(),
        "MEMORY".bold(),
        "READ".bold(),
        "WRITE".bold()
    );
    for sample in samples {
        println!(
            "  {:<19}  {}  {:>10}  {:>10}  {:>10}",
            format_timestamp(sample.timestamp),
            cpu_colored(sample.cpu_percent),
            format_bytes(sample.memory_bytes),
            format_bytes(sample.disk_read_bytes),
            format_bytes(sample.disk_write_bytes)
        );
    }
}

pub fn print_buckets(buckets: &[AggregateBucket]) {
    print_section_header("SYSTEM AGGREGATE");

    if buckets.is_empty() {
        println!("  {}", "No samples in range".dimmed());
        return;
    }

    let mut current_start = None;
    for bucket in buckets {
        if current_start != Some(bucket.window_start) {
            current_start = Some(bucket.window_start);
            println!("  {}", format_timestamp(bucket.window_start).bold());
        }
        println!(
            "    {:<12} {}",
            bucket.metric.as_str(),
            format_metric_value(bucket.metric, bucket.value).cyan()
        );
    }
}

pub fn print_summary(summary: &SystemSummary) {
    print_section_header("SYSTEM SUMMARY");

    if summary.data_points == 0 {
        println!("  {}", "No samples in range".dimmed());
        return;
    }

    if let (Some(first), Some(last)) = (summary.first_timestamp, summary.last_timestamp) {
        println!(
            "  Range: {} .. {} ({})",
            format_timestamp(first),
            format_timestamp(last),
            format_duration_ms(last.saturating_sub(first).max(0) as u64)
        );
    }
    println!("  Data points: {}", summary.data_points);
    println!(
        "  CPU: avg {} max {}",
        cpu_colored(summary.cpu_avg),
        cpu_colored(summary.cpu_max)
    );
    println!(
        "  Memory: avg {} max {}",
        format_bytes(summary.memory_avg.round() as u64),
        format_bytes(summary.memory_max.round() as u64)
    );
    println!(
        "  Disk: {} read, {} written",
        format_bytes(summary.disk_read_total),
        format_bytes(summary.disk_write_total)
    );
    println!("  Processes: {} on average", summary.processes_avg);
}

pub fn print_analysis(analysis: &ProcessAnalysis) {
    print_section_header(&format!("PROCESS {}", analysis.name));

    if analysis.data_points == 0 {
        println!("  {}", "No samples in range".dimmed());
        return;
    }

    let pids: Vec<String> = analysis
        .identities
        .iter()
        .map(|identity| identity.pid.to_string())
        .collect();
    println!("  Instances: {} (PID {})", pids.len(), pids.join(", "));
    println!("  Data points: {}", analysis.data_points);
    println!(
        "  CPU: avg {} max {}",
        cpu_colored(analysis.cpu_avg),
        cpu_colored(analysis.cpu_max)
    );
    println!(
        "  Memory: avg {} max {}",
        format_bytes(analysis.memory_avg.round() as u64),
        format_bytes(analysis.memory_max)
    );
}

pub fn print_stats(stats: &StatsSnapshot) {
    print_section_header("SAMPLER");
    println!("  Iterations: {}", stats.iterations);
    println!("  Samples written: {}", stats.samples_written);

    let errors = stats.collection_errors + stats.store_errors;
    let errors_text = format!(
        "{} collection, {} store",
        stats.collection_errors, stats.store_errors
    );
    if errors == 0 {
        println!("  Errors: {}", errors_text.green());
    } else {
        println!("  Errors: {}", errors_text.yellow());
    }
    if stats.lost_samples > 0 {
        println!("  Lost samples: {}", stats.lost_samples.to_string().red());
    }
    if let Some(last) = &stats.last_error {
        println!("  Last error: {}", last.dimmed());
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        return name.to_string();
    }
    let mut cut: String = name.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
