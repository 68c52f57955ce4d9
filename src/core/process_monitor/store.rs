//! Durable time-series store for process samples.
//!
//! One SQLite file in WAL mode. The sampler is the single writer; any number
//! of readers query through pooled read-only connections and never observe a
//! half-written batch, because each batch (and the retention pass that follows
//! it) commits as one transaction.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Params, Row, TransactionBehavior,
};

use crate::error::{SchemaError, StoreError};

use super::cursor::{ReaderPool, SampleCursor};
use super::metrics::{
    Metric, ProcessIdentity, RankedRow, RetentionPolicy, Sample, SystemTotals, TimeWindow,
    Timestamp,
};

/// Version written to `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r"
CREATE TABLE processes (
    id          INTEGER PRIMARY KEY,
    pid         INTEGER NOT NULL,
    start_time  INTEGER NOT NULL,
    name        TEXT NOT NULL,
    UNIQUE (pid, start_time)
);
CREATE INDEX processes_by_name ON processes (name);
CREATE TABLE samples (
    process_id        INTEGER NOT NULL,
    ts                INTEGER NOT NULL,
    cpu_percent       REAL NOT NULL,
    memory_bytes      INTEGER NOT NULL,
    disk_read_bytes   INTEGER NOT NULL,
    disk_write_bytes  INTEGER NOT NULL,
    PRIMARY KEY (process_id, ts)
) WITHOUT ROWID;
CREATE INDEX samples_by_ts ON samples (ts);
CREATE TABLE retention_policy (
    id             INTEGER PRIMARY KEY CHECK (id = 1),
    max_age_ms     INTEGER NOT NULL,
    max_row_count  INTEGER NOT NULL
);
";

const UPSERT_PROCESS: &str = "INSERT INTO processes (pid, start_time, name) VALUES (?1, ?2, ?3) \
     ON CONFLICT (pid, start_time) DO UPDATE SET name = excluded.name \
     RETURNING id";

const INSERT_SAMPLE: &str = "INSERT INTO samples \
     (process_id, ts, cpu_percent, memory_bytes, disk_read_bytes, disk_write_bytes) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// What one committed append did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendReport {
    pub inserted: usize,
    pub evicted: usize,
}

/// The single write connection and the committed row count it maintains
struct Writer {
    conn: Connection,
    rows: u64,
}

/// SQLite-backed sample store
pub struct Store {
    path: PathBuf,
    writer: Mutex<Writer>,
    readers: Arc<ReaderPool>,
    policy: Mutex<RetentionPolicy>,
}

impl Store {
    /// Open or create a store at `path`.
    ///
    /// `policy` replaces the stored retention record. `busy_timeout` bounds
    /// how long any statement waits on a locked file.
    pub fn open(
        path: &Path,
        policy: RetentionPolicy,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        prepare_schema(&mut conn, path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        write_policy(&conn, &policy)?;
        let rows =
            conn.query_row("SELECT COUNT(*) FROM samples", [], |row| column_u64(row, 0))?;

        debug!(
            "Opened sample store at {} ({} samples)",
            path.display(),
            rows
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Writer { conn, rows }),
            readers: Arc::new(ReaderPool::new(path.to_path_buf(), busy_timeout)),
            policy: Mutex::new(policy),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically append one sampling iteration and enforce retention.
    ///
    /// Either every row of `batch` becomes visible together with the
    /// retention deletions it triggers, or nothing changes.
    pub fn append(&self, batch: &[Sample]) -> Result<AppendReport, StoreError> {
        if batch.is_empty() {
            return Ok(AppendReport::default());
        }
        if let Some(bad) = batch.iter().find(|s| !s.cpu_percent.is_finite()) {
            return Err(StoreError::invalid_value(format!(
                "non-finite cpu_percent for {} at {}",
                bad.identity, bad.timestamp
            )));
        }

        let policy = *self.policy.lock();
        let mut writer = self.writer.lock();
        let Writer { conn, rows } = &mut *writer;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut upsert = tx.prepare_cached(UPSERT_PROCESS)?;
            let mut insert = tx.prepare_cached(INSERT_SAMPLE)?;
            let mut ids: HashMap<(u32, i64), i64> = HashMap::new();

            for sample in batch {
                let key = sample.identity.key();
                let process_id = match ids.get(&key) {
                    Some(id) => *id,
                    None => {
                        let id: i64 = upsert.query_row(
                            params![
                                sample.identity.pid,
                                sample.identity.start_time,
                                sample.identity.name
                            ],
                            |row| row.get(0),
                        )?;
                        ids.insert(key, id);
                        id
                    }
                };

                insert.execute(params![
                    process_id,
                    sample.timestamp,
                    sample.cpu_percent,
                    sql_int(sample.memory_bytes, "memory_bytes")?,
                    sql_int(sample.disk_read_bytes, "disk_read_bytes")?,
                    sql_int(sample.disk_write_bytes, "disk_write_bytes")?,
                ])?;
            }
        }
        let stored = *rows + batch.len() as u64;
        let evicted = apply_retention(&tx, &policy, stored)?;
        tx.commit()?;
        *rows = stored.saturating_sub(evicted as u64);

        Ok(AppendReport {
            inserted: batch.len(),
            evicted,
        })
    }

    /// Delete rows older than `max_age` (relative to the newest stored
    /// sample) and the oldest rows beyond `max_row_count`.
    ///
    /// Returns the number of deleted samples. Running it twice without an
    /// append in between deletes nothing the second time.
    pub fn enforce_retention(&self) -> Result<usize, StoreError> {
        let policy = *self.policy.lock();
        let mut writer = self.writer.lock();
        let Writer { conn, rows } = &mut *writer;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let evicted = apply_retention(&tx, &policy, *rows)?;
        tx.commit()?;
        *rows = rows.saturating_sub(evicted as u64);
        Ok(evicted)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        *self.policy.lock()
    }

    /// Persist a new retention policy; it applies from the next append
    pub fn set_retention_policy(&self, policy: RetentionPolicy) -> Result<(), StoreError> {
        let writer = self.writer.lock();
        write_policy(&writer.conn, &policy)?;
        *self.policy.lock() = policy;
        Ok(())
    }

    /// Retention policy as recorded in the file
    pub fn stored_retention_policy(&self) -> Result<Option<RetentionPolicy>, StoreError> {
        self.readers.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT max_age_ms, max_row_count FROM retention_policy WHERE id = 1",
                    [],
                    |row| Ok((column_u64(row, 0)?, column_u64(row, 1)?)),
                )
                .optional()?;
            Ok(row.map(|(age_ms, rows)| {
                RetentionPolicy::new(Duration::from_millis(age_ms), rows)
            }))
        })
    }

    /// Samples for `identity` with `start <= timestamp <= end`, oldest first
    pub fn query_range(
        &self,
        identity: &ProcessIdentity,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<SampleCursor, StoreError> {
        SampleCursor::open(
            Arc::clone(&self.readers),
            identity,
            TimeWindow::new(start, end),
        )
    }

    /// Rank processes by `metric` using each one's latest sample at or
    /// before `at`. Descending by value, ties broken by lower pid.
    pub fn query_top_n(
        &self,
        metric: Metric,
        at: Timestamp,
        n: usize,
    ) -> Result<Vec<RankedRow>, StoreError> {
        self.query_top_n_fresh(metric, at, n, None)
    }

    /// Like [`Store::query_top_n`], but ignores processes whose latest
    /// sample is older than `at - max_staleness` (typically exited ones).
    pub fn query_top_n_fresh(
        &self,
        metric: Metric,
        at: Timestamp,
        n: usize,
        max_staleness: Option<Duration>,
    ) -> Result<Vec<RankedRow>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let oldest = match max_staleness {
            Some(staleness) => TimeWindow::ending_at(at, staleness).start,
            None => i64::MIN,
        };
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let column = metric.column();
        let sql = format!(
            "SELECT p.pid, p.start_time, p.name, s.{column} \
             FROM processes p \
             JOIN samples s ON s.process_id = p.id \
              AND s.ts = (SELECT MAX(ts) FROM samples WHERE process_id = p.id AND ts <= ?1) \
             WHERE s.ts >= ?2 \
             ORDER BY s.{column} DESC, p.pid ASC, p.start_time ASC \
             LIMIT ?3"
        );

        self.readers.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![at, oldest, limit], |row| {
                Ok(RankedRow {
                    identity: ProcessIdentity::new(row.get(0)?, row.get(1)?, row.get::<_, String>(2)?),
                    value: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Per-timestamp totals over all processes, oldest first
    pub fn query_window_totals(&self, window: TimeWindow) -> Result<Vec<SystemTotals>, StoreError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        self.readers.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT ts, SUM(cpu_percent), SUM(memory_bytes), SUM(disk_read_bytes), \
                        SUM(disk_write_bytes), COUNT(*) \
                 FROM samples \
                 WHERE ts >= ?1 AND ts <= ?2 \
                 GROUP BY ts \
                 ORDER BY ts ASC",
            )?;
            let rows = stmt.query_map(params![window.start, window.end], |row| {
                Ok(SystemTotals {
                    timestamp: row.get(0)?,
                    cpu_percent: row.get(1)?,
                    memory_bytes: column_u64(row, 2)?,
                    disk_read_bytes: column_u64(row, 3)?,
                    disk_write_bytes: column_u64(row, 4)?,
                    process_count: column_u64(row, 5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Every stored identity with this exact name, oldest first
    pub fn identities_by_name(&self, name: &str) -> Result<Vec<ProcessIdentity>, StoreError> {
        self.find_identities("WHERE name = ?1", name)
    }

    /// Every stored identity that used this pid, oldest first
    pub fn identities_by_pid(&self, pid: u32) -> Result<Vec<ProcessIdentity>, StoreError> {
        self.find_identities("WHERE pid = ?1", pid)
    }

    fn find_identities<P: rusqlite::ToSql>(
        &self,
        filter: &str,
        value: P,
    ) -> Result<Vec<ProcessIdentity>, StoreError> {
        let sql = format!(
            "SELECT pid, start_time, name FROM processes {} ORDER BY start_time ASC, pid ASC",
            filter
        );
        self.readers.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![value], |row| {
                Ok(ProcessIdentity::new(row.get(0)?, row.get(1)?, row.get::<_, String>(2)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn row_count(&self) -> Result<u64, StoreError> {
        self.readers.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM samples", [], |row| column_u64(row, 0))?)
        })
    }

    pub fn latest_timestamp(&self) -> Result<Option<Timestamp>, StoreError> {
        self.readers.with_conn(|conn| {
            Ok(conn.query_row("SELECT MAX(ts) FROM samples", [], |row| row.get(0))?)
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("policy", &*self.policy.lock())
            .finish_non_exhaustive()
    }
}

/// Create the schema in an empty file, or verify the version of an existing one
fn prepare_schema(conn: &mut Connection, path: &Path) -> Result<(), StoreError> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|err| match err.sqlite_error_code() {
            Some(ErrorCode::NotADatabase) => StoreError::Schema(SchemaError::Unrecognized(
                format!("{} is not a SQLite database", path.display()),
            )),
            _ => StoreError::Sqlite(err),
        })?;

    match version {
        SCHEMA_VERSION => Ok(()),
        0 => {
            let objects: i64 =
                conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))?;
            if objects > 0 {
                return Err(SchemaError::Unrecognized(format!(
                    "{} holds tables but no schema version",
                    path.display()
                ))
                .into());
            }

            let tx = conn.transaction()?;
            tx.execute_batch(SCHEMA)?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
            debug!("Created store schema version {}", SCHEMA_VERSION);
            Ok(())
        }
        found => Err(SchemaError::UnsupportedVersion {
            found,
            supported: SCHEMA_VERSION,
        }
        .into()),
    }
}

fn write_policy(conn: &Connection, policy: &RetentionPolicy) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO retention_policy (id, max_age_ms, max_row_count) VALUES (1, ?1, ?2) \
         ON CONFLICT (id) DO UPDATE SET \
             max_age_ms = excluded.max_age_ms, \
             max_row_count = excluded.max_row_count",
        params![
            policy.max_age_millis(),
            sql_int(policy.max_row_count, "max_row_count")?
        ],
    )?;
    Ok(())
}

/// SQLite integers are signed 64-bit; larger values are rejected, not wrapped
fn sql_int(value: u64, column: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| {
        StoreError::invalid_value(format!("{} value {} is out of range", column, value))
    })
}

pub(crate) fn column_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

/// Remove whole sample rows that fall outside `policy`.
///
/// `stored` is the row count before this pass. Cost follows the number of
/// evicted rows, not the size of the table.
fn apply_retention(
    conn: &Connection,
    policy: &RetentionPolicy,
    stored: u64,
) -> Result<usize, StoreError> {
    let newest: Option<Timestamp> =
        conn.query_row("SELECT MAX(ts) FROM samples", [], |row| row.get(0))?;
    let Some(newest) = newest else {
        return Ok(0);
    };

    let mut touched = HashSet::new();
    let cutoff = newest.saturating_sub(policy.max_age_millis());
    let mut evicted = delete_samples(
        conn,
        "DELETE FROM samples WHERE ts < ?1 RETURNING process_id",
        params![cutoff],
        &mut touched,
    )?;

    let excess = stored
        .saturating_sub(evicted as u64)
        .saturating_sub(policy.max_row_count);
    if excess > 0 {
        evicted += delete_samples(
            conn,
            "DELETE FROM samples WHERE (process_id, ts) IN ( \
                 SELECT process_id, ts FROM samples ORDER BY ts ASC, process_id ASC LIMIT ?1) \
             RETURNING process_id",
            params![sql_int(excess, "excess")?],
            &mut touched,
        )?;
    }

    if !touched.is_empty() {
        let mut orphan = conn.prepare_cached(
            "DELETE FROM processes WHERE id = ?1 \
             AND NOT EXISTS (SELECT 1 FROM samples WHERE process_id = ?1)",
        )?;
        for process_id in &touched {
            orphan.execute(params![process_id])?;
        }
        debug!("Retention removed {} samples", evicted);
    }

    Ok(evicted)
}

/// Run a `DELETE .. RETURNING process_id`, collecting the affected processes
fn delete_samples<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    touched: &mut HashSet<i64>,
) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut deleted = 0;
    for process_id in stmt.query_map(params, |row| row.get::<_, i64>(0))? {
        touched.insert(process_id?);
        deleted += 1;
    }
    Ok(deleted)
}
