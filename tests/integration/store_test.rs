use procwatch::core::process_monitor::{
    Metric, ProcessIdentity, RetentionPolicy, Sample, Store, Timestamp,
};
use procwatch::error::{SchemaError, StoreError};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn open(path: &Path, policy: RetentionPolicy) -> Store {
    Store::open(path, policy, Duration::from_secs(2)).unwrap()
}

fn identity(pid: u32) -> ProcessIdentity {
    ProcessIdentity::new(pid, 1_700_000_000, format!("proc{}", pid))
}

fn sample(identity: &ProcessIdentity, ts: Timestamp, cpu: f64, memory: u64) -> Sample {
    Sample {
        identity: identity.clone(),
        timestamp: ts,
        cpu_percent: cpu,
        memory_bytes: memory,
        disk_read_bytes: ts as u64 / 10,
        disk_write_bytes: 7,
    }
}

#[test]
fn test_query_range_ordered_unique_and_bounded() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    let a = identity(10);
    let b = identity(20);

    for ts in (0..10).map(|i| 1_000 + i * 1_000) {
        store
            .append(&[sample(&b, ts, 2.0, 200), sample(&a, ts, 1.0, 100)])
            .unwrap();
    }

    let rows: Vec<Sample> = store
        .query_range(&a, 3_000, 7_000)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows.len(), 5);
    assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(rows.iter().all(|s| s.timestamp >= 3_000 && s.timestamp <= 7_000));
    assert!(rows.iter().all(|s| s.identity == a));

    let unique: HashSet<Timestamp> = rows.iter().map(|s| s.timestamp).collect();
    assert_eq!(unique.len(), rows.len());
}

#[test]
fn test_round_trip_exact_window() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    let id = identity(42);
    let batch = vec![
        sample(&id, 5_000, 12.5, 4096),
        sample(&id, 6_000, 99.25, 8192),
    ];
    store.append(&batch).unwrap();

    let rows: Vec<Sample> = store
        .query_range(&id, 5_000, 6_000)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows, batch);
    assert_eq!(rows[0].identity.name, "proc42");
}

#[test]
fn test_query_range_unknown_process_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    store.append(&[sample(&identity(1), 1_000, 1.0, 1)]).unwrap();

    let mut cursor = store.query_range(&identity(2), 0, 10_000).unwrap();
    assert!(cursor.next().is_none());
}

#[test]
fn test_pid_reuse_kept_apart() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    let first = ProcessIdentity::new(300, 1_000, "old");
    let second = ProcessIdentity::new(300, 2_000, "new");

    store.append(&[sample(&first, 1_000, 1.0, 1)]).unwrap();
    store.append(&[sample(&second, 2_000, 2.0, 2)]).unwrap();

    let old_rows: Vec<Sample> = store
        .query_range(&first, 0, 10_000)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(old_rows.len(), 1);
    assert_eq!(old_rows[0].identity.name, "old");

    let identities = store.identities_by_pid(300).unwrap();
    assert_eq!(identities, vec![first, second]);
}

#[test]
fn test_long_series_pages_through() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    let id = identity(5);

    let batch: Vec<Sample> = (0..1_500).map(|i| sample(&id, i * 10, 1.0, 1)).collect();
    store.append(&batch).unwrap();

    let count = store.query_range(&id, 0, i64::MAX).unwrap().count();
    assert_eq!(count, 1_500);
}

#[test]
fn test_open_cursor_keeps_its_committed_state() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    let id = identity(5);
    let batch: Vec<Sample> = (0..600).map(|i| sample(&id, i * 10, 1.0, 1)).collect();
    store.append(&batch).unwrap();

    // First page is read here, the rest lazily after the writes below
    let cursor = store.query_range(&id, 0, i64::MAX).unwrap();

    store
        .set_retention_policy(RetentionPolicy::new(Duration::from_secs(86_400), 200))
        .unwrap();
    let more: Vec<Sample> = (600..700).map(|i| sample(&id, i * 10, 1.0, 1)).collect();
    let report = store.append(&more).unwrap();
    assert_eq!(report.evicted, 500);

    let seen: Vec<Timestamp> = cursor.map(|s| s.unwrap().timestamp).collect();
    assert_eq!(seen, (0..600).map(|i| i * 10).collect::<Vec<_>>());

    let now: Vec<Timestamp> = store
        .query_range(&id, 0, i64::MAX)
        .unwrap()
        .map(|s| s.unwrap().timestamp)
        .collect();
    assert_eq!(now.len(), 200);
    assert_eq!(now[0], 5_000);
}

#[test]
fn test_readers_not_blocked_by_uncommitted_batch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.db");
    let store = open(&path, RetentionPolicy::default());
    let id = identity(1);
    store.append(&[sample(&id, 1_000, 5.0, 100)]).unwrap();

    let writer = rusqlite::Connection::open(&path).unwrap();
    writer
        .execute_batch(
            "BEGIN IMMEDIATE;
             INSERT INTO processes (pid, start_time, name) VALUES (99, 1, 'pending');
             INSERT INTO samples VALUES (last_insert_rowid(), 2000, 90.0, 1, 0, 0);",
        )
        .unwrap();

    let started = std::time::Instant::now();
    assert_eq!(store.row_count().unwrap(), 1);
    let top = store.query_top_n(Metric::CpuPercent, i64::MAX, 10).unwrap();
    assert!(store.identities_by_pid(99).unwrap().is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(top.len(), 1);
    assert_eq!(top[0].identity, id);

    writer.execute_batch("ROLLBACK").unwrap();
    assert_eq!(store.row_count().unwrap(), 1);
}

#[test]
fn test_max_row_count_keeps_newest_five() {
    let dir = TempDir::new().unwrap();
    let store = open(
        &dir.path().join("samples.db"),
        RetentionPolicy::new(Duration::from_secs(86_400), 1_000),
    );
    let id = identity(7);
    for i in 0..9 {
        store.append(&[sample(&id, 1_000 * (i + 1), 1.0, 1)]).unwrap();
    }
    assert_eq!(store.row_count().unwrap(), 9);

    store
        .set_retention_policy(RetentionPolicy::new(Duration::from_secs(86_400), 5))
        .unwrap();
    let evicted = store.enforce_retention().unwrap();
    assert_eq!(evicted, 4);

    let remaining: Vec<Timestamp> = store
        .query_range(&id, 0, i64::MAX)
        .unwrap()
        .map(|s| s.unwrap().timestamp)
        .collect();
    assert_eq!(remaining, vec![5_000, 6_000, 7_000, 8_000, 9_000]);
}

#[test]
fn test_retention_runs_with_every_append() {
    let dir = TempDir::new().unwrap();
    let store = open(
        &dir.path().join("samples.db"),
        RetentionPolicy::new(Duration::from_secs(86_400), 5),
    );
    let id = identity(7);
    for i in 0..9 {
        store.append(&[sample(&id, 1_000 * (i + 1), 1.0, 1)]).unwrap();
    }

    assert_eq!(store.row_count().unwrap(), 5);
    assert_eq!(store.enforce_retention().unwrap(), 0);
}

#[test]
fn test_enforce_retention_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open(
        &dir.path().join("samples.db"),
        RetentionPolicy::new(Duration::from_secs(86_400), 100),
    );
    let a = identity(1);
    let b = identity(2);
    for i in 0..20 {
        store
            .append(&[sample(&a, i * 1_000, 1.0, 1), sample(&b, i * 1_000, 2.0, 2)])
            .unwrap();
    }

    store
        .set_retention_policy(RetentionPolicy::new(Duration::from_secs(10), 15))
        .unwrap();

    store.enforce_retention().unwrap();
    let after_once: Vec<Sample> = store
        .query_range(&a, 0, i64::MAX)
        .unwrap()
        .chain(store.query_range(&b, 0, i64::MAX).unwrap())
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(store.enforce_retention().unwrap(), 0);
    let after_twice: Vec<Sample> = store
        .query_range(&a, 0, i64::MAX)
        .unwrap()
        .chain(store.query_range(&b, 0, i64::MAX).unwrap())
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(after_once, after_twice);
    assert!(after_once.len() <= 15);
}

#[test]
fn test_top_n_sorted_with_pid_tiebreak() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());

    let batch: Vec<Sample> = [(30, 5.0), (10, 5.0), (20, 9.0), (40, 1.0), (50, 5.0)]
        .iter()
        .map(|&(pid, cpu)| sample(&identity(pid), 1_000, cpu, u64::from(pid)))
        .collect();
    store.append(&batch).unwrap();

    let rows = store.query_top_n(Metric::CpuPercent, 1_000, 4).unwrap();
    let ranked: Vec<(u32, f64)> = rows.iter().map(|r| (r.identity.pid, r.value)).collect();
    assert_eq!(ranked, vec![(20, 9.0), (10, 5.0), (30, 5.0), (50, 5.0)]);

    for metric in Metric::ALL {
        for n in [0, 1, 3, 10] {
            let rows = store.query_top_n(metric, 1_000, n).unwrap();
            assert!(rows.len() <= n);
            assert!(rows.windows(2).all(|w| {
                w[0].value > w[1].value
                    || (w[0].value == w[1].value && w[0].identity.pid < w[1].identity.pid)
            }));
        }
    }
}

#[test]
fn test_top_n_uses_latest_sample_at_or_before() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    let a = identity(1);
    let b = identity(2);

    store
        .append(&[sample(&a, 1_000, 80.0, 1), sample(&b, 1_000, 10.0, 1)])
        .unwrap();
    store
        .append(&[sample(&a, 2_000, 5.0, 1), sample(&b, 2_000, 50.0, 1)])
        .unwrap();

    let at_first = store.query_top_n(Metric::CpuPercent, 1_500, 2).unwrap();
    assert_eq!(at_first[0].identity, a);
    assert_eq!(at_first[0].value, 80.0);

    let at_second = store.query_top_n(Metric::CpuPercent, 2_000, 2).unwrap();
    assert_eq!(at_second[0].identity, b);
    assert_eq!(at_second[0].value, 50.0);

    assert!(store.query_top_n(Metric::CpuPercent, 500, 2).unwrap().is_empty());
}

#[test]
fn test_top_n_fresh_skips_exited_processes() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir.path().join("samples.db"), RetentionPolicy::default());
    let gone = identity(1);
    let alive = identity(2);

    store
        .append(&[sample(&gone, 1_000, 90.0, 1), sample(&alive, 1_000, 1.0, 1)])
        .unwrap();
    store.append(&[sample(&alive, 10_000, 2.0, 1)]).unwrap();

    let all = store.query_top_n(Metric::CpuPercent, 10_000, 5).unwrap();
    assert_eq!(all.len(), 2);

    let fresh = store
        .query_top_n_fresh(Metric::CpuPercent, 10_000, 5, Some(Duration::from_secs(3)))
        .unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].identity, alive);
}

#[test]
fn test_reopen_keeps_samples() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.db");
    {
        let store = open(&path, RetentionPolicy::default());
        store.append(&[sample(&identity(1), 1_000, 1.0, 1)]).unwrap();
    }

    let store = open(&path, RetentionPolicy::default());
    assert_eq!(store.row_count().unwrap(), 1);
    assert_eq!(store.latest_timestamp().unwrap(), Some(1_000));
}

#[test]
fn test_unknown_schema_version_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE samples (x INTEGER); PRAGMA user_version = 99;")
            .unwrap();
    }

    let err = Store::open(&path, RetentionPolicy::default(), Duration::from_secs(1)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Schema(SchemaError::UnsupportedVersion { found: 99, .. })
    ));
}

#[test]
fn test_unversioned_database_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("other.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE notes (body TEXT);").unwrap();
    }

    let err = Store::open(&path, RetentionPolicy::default(), Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, StoreError::Schema(SchemaError::Unrecognized(_))));
}

#[test]
fn test_non_database_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.db");
    std::fs::write(&path, vec![0xAB_u8; 4096]).unwrap();

    let err = Store::open(&path, RetentionPolicy::default(), Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, StoreError::Schema(SchemaError::Unrecognized(_))));
}
