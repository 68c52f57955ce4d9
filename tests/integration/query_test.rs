use procwatch::core::process_monitor::{
    Metric, ProcessIdentity, QueryEngine, RetentionPolicy, Sample, Store, TimeWindow, Timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn sample(pid: u32, name: &str, ts: Timestamp, cpu: f64, memory: u64, read: u64) -> Sample {
    Sample {
        identity: ProcessIdentity::new(pid, 1_000, name),
        timestamp: ts,
        cpu_percent: cpu,
        memory_bytes: memory,
        disk_read_bytes: read,
        disk_write_bytes: 0,
    }
}

/// Two processes sampled at 0, 1000, 2000 and 3000
fn engine(dir: &TempDir) -> QueryEngine {
    let store = Store::open(
        &dir.path().join("samples.db"),
        RetentionPolicy::default(),
        Duration::from_secs(2),
    )
    .unwrap();

    for (i, ts) in [0, 1_000, 2_000, 3_000].into_iter().enumerate() {
        let step = i as f64;
        store
            .append(&[
                sample(1, "editor", ts, 10.0 + step, 100, 10),
                sample(2, "compiler", ts, 20.0 * step, 300, 5),
            ])
            .unwrap();
    }
    QueryEngine::new(Arc::new(store))
}

#[test]
fn test_series_matches_window() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let id = ProcessIdentity::new(1, 1_000, "editor");

    let rows = engine.series(&id, TimeWindow::new(1_000, 2_000)).unwrap();
    let stamps: Vec<Timestamp> = rows.iter().map(|s| s.timestamp).collect();
    assert_eq!(stamps, vec![1_000, 2_000]);
}

#[test]
fn test_system_aggregate_reduces_per_bucket() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let buckets = engine
        .system_aggregate(TimeWindow::new(0, 4_000), Duration::from_secs(2))
        .unwrap();

    // Two buckets, four metrics each, ordered by start then metric
    assert_eq!(buckets.len(), 8);
    assert!(buckets[..4].iter().all(|b| b.window_start == 0 && b.window_end == 2_000));
    assert!(buckets[4..].iter().all(|b| b.window_start == 2_000 && b.window_end == 4_000));
    let metrics: Vec<Metric> = buckets[..4].iter().map(|b| b.metric).collect();
    assert_eq!(metrics, Metric::ALL.to_vec());

    // Totals per instant: cpu 10, 31, 52, 73; memory 400; read 15
    assert_eq!(buckets[0].value, (10.0 + 31.0) / 2.0);
    assert_eq!(buckets[1].value, 400.0);
    assert_eq!(buckets[2].value, 30.0);
    assert_eq!(buckets[3].value, 0.0);
    assert_eq!(buckets[4].value, (52.0 + 73.0) / 2.0);
}

#[test]
fn test_aggregate_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let window = TimeWindow::new(0, 3_000);

    let first = engine
        .system_aggregate(window, Duration::from_millis(700))
        .unwrap();
    let second = engine
        .system_aggregate(window, Duration::from_millis(700))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_empty_window_gives_empty_results() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let window = TimeWindow::new(10_000, 20_000);

    assert!(engine
        .system_aggregate(window, Duration::from_secs(1))
        .unwrap()
        .is_empty());
    assert!(engine
        .series(&ProcessIdentity::new(1, 1_000, "editor"), window)
        .unwrap()
        .is_empty());
    assert!(engine
        .series(&ProcessIdentity::new(9, 9, "ghost"), window)
        .unwrap()
        .is_empty());

    let summary = engine.system_summary(window).unwrap();
    assert_eq!(summary.data_points, 0);
    assert_eq!(summary.first_timestamp, None);
}

#[test]
fn test_zero_bucket_width_is_an_error() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    assert!(engine
        .system_aggregate(TimeWindow::new(0, 1_000), Duration::ZERO)
        .is_err());
}

#[test]
fn test_process_buckets_single_metric() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let id = ProcessIdentity::new(2, 1_000, "compiler");

    let buckets = engine
        .process_buckets(&id, TimeWindow::new(0, 3_000), Duration::from_secs(3), Metric::CpuPercent)
        .unwrap();

    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].value, (0.0 + 20.0 + 40.0 + 60.0) / 4.0);
}

#[test]
fn test_system_summary() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let summary = engine.system_summary(TimeWindow::new(0, 3_000)).unwrap();
    assert_eq!(summary.data_points, 4);
    assert_eq!(summary.cpu_max, 73.0);
    assert_eq!(summary.cpu_avg, (10.0 + 31.0 + 52.0 + 73.0) / 4.0);
    assert_eq!(summary.memory_max, 400.0);
    assert_eq!(summary.disk_read_total, 60);
    assert_eq!(summary.processes_avg, 2);
    assert_eq!(summary.first_timestamp, Some(0));
    assert_eq!(summary.last_timestamp, Some(3_000));
}

#[test]
fn test_process_analysis_by_name() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let analysis = engine
        .process_analysis("editor", TimeWindow::new(0, 3_000))
        .unwrap();
    assert_eq!(analysis.identities.len(), 1);
    assert_eq!(analysis.data_points, 4);
    assert_eq!(analysis.cpu_max, 13.0);
    assert_eq!(analysis.cpu_avg, 11.5);
    assert_eq!(analysis.memory_max, 100);

    let missing = engine
        .process_analysis("nothing", TimeWindow::new(0, 3_000))
        .unwrap();
    assert_eq!(missing.data_points, 0);
    assert!(missing.identities.is_empty());
}

#[test]
fn test_top_n_through_engine() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let rows = engine.top_n(Metric::CpuPercent, 3_000, 1).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].identity.pid, 2);
    assert_eq!(rows[0].value, 60.0);

    let by_memory = engine.top_n(Metric::MemoryBytes, 3_000, 5).unwrap();
    assert_eq!(by_memory[0].identity.name, "compiler");
}
