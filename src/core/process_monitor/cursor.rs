//! Read-side connections for the sample store.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::StoreError;

use super::metrics::{ProcessIdentity, Sample, TimeWindow, Timestamp};
use super::store::column_u64;

const MAX_IDLE_READERS: usize = 4;
const PAGE_SIZE: usize = 512;

/// Pool of read-only connections. In WAL mode readers never block the
/// writer and each read transaction sees a single committed state.
pub(crate) struct ReaderPool {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    pub(crate) fn new(path: PathBuf, busy_timeout: Duration) -> Self {
        Self {
            path,
            busy_timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn acquire(&self) -> Result<Connection, StoreError> {
        if let Some(conn) = self.idle.lock().pop() {
            return Ok(conn);
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    pub(crate) fn release(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
    }

    /// Run a single-statement read on a pooled connection
    pub(crate) fn with_conn<T>(
        &self,
        read: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.acquire()?;
        let result = read(&conn);
        self.release(conn);
        result
    }
}

/// Lazily pages through one process's samples inside a single read
/// transaction, so the whole sequence reflects one committed store state.
///
/// Yields samples in ascending timestamp order. The connection goes back to
/// the pool once the cursor is exhausted or dropped.
pub struct SampleCursor {
    pool: Arc<ReaderPool>,
    conn: Option<Connection>,
    identity: ProcessIdentity,
    process_id: Option<i64>,
    next_from: Timestamp,
    end: Timestamp,
    page: VecDeque<Sample>,
    exhausted: bool,
}

impl SampleCursor {
    pub(crate) fn open(
        pool: Arc<ReaderPool>,
        identity: &ProcessIdentity,
        window: TimeWindow,
    ) -> Result<Self, StoreError> {
        let mut cursor = Self {
            pool,
            conn: None,
            identity: identity.clone(),
            process_id: None,
            next_from: window.start,
            end: window.end,
            page: VecDeque::new(),
            exhausted: window.is_empty(),
        };
        if cursor.exhausted {
            return Ok(cursor);
        }

        let conn = cursor.pool.acquire()?;
        conn.execute_batch("BEGIN")?;
        let found = conn
            .query_row(
                "SELECT id, name FROM processes WHERE pid = ?1 AND start_time = ?2",
                params![identity.pid, identity.start_time],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional();
        cursor.conn = Some(conn);

        match found? {
            Some((process_id, name)) => {
                cursor.process_id = Some(process_id);
                cursor.identity.name = name;
                cursor.fill_page()?;
            }
            None => cursor.finish(),
        }

        Ok(cursor)
    }

    fn fill_page(&mut self) -> Result<(), StoreError> {
        let (Some(conn), Some(process_id)) = (self.conn.as_ref(), self.process_id) else {
            self.exhausted = true;
            return Ok(());
        };
        let identity = &self.identity;

        let mut stmt = conn.prepare_cached(
            "SELECT ts, cpu_percent, memory_bytes, disk_read_bytes, disk_write_bytes \
             FROM samples \
             WHERE process_id = ?1 AND ts >= ?2 AND ts <= ?3 \
             ORDER BY ts ASC \
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![process_id, self.next_from, self.end, PAGE_SIZE as i64],
            |row| {
                Ok(Sample {
                    identity: identity.clone(),
                    timestamp: row.get(0)?,
                    cpu_percent: row.get(1)?,
                    memory_bytes: column_u64(row, 2)?,
                    disk_read_bytes: column_u64(row, 3)?,
                    disk_write_bytes: column_u64(row, 4)?,
                })
            },
        )?;
        let batch = rows.collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        if batch.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            match last.timestamp.checked_add(1) {
                Some(next) => self.next_from = next,
                None => self.exhausted = true,
            }
        }
        self.page.extend(batch);
        Ok(())
    }

    fn finish(&mut self) {
        self.exhausted = true;
        if let Some(conn) = self.conn.take() {
            if conn.execute_batch("COMMIT").is_ok() {
                self.pool.release(conn);
            }
        }
    }

    /// The identity being read, with the name as stored
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }
}

impl Iterator for SampleCursor {
    type Item = Result<Sample, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sample) = self.page.pop_front() {
                return Some(Ok(sample));
            }
            if self.exhausted {
                self.finish();
                return None;
            }
            if let Err(err) = self.fill_page() {
                self.finish();
                return Some(Err(err));
            }
        }
    }
}

impl Drop for SampleCursor {
    fn drop(&mut self) {
        self.finish();
    }
}
