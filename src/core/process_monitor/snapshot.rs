//! Process table snapshots.
//!
//! A [`Snapshot`] is one full read of the OS process table with raw,
//! cumulative per-process counters. Snapshots are transient: the sampler
//! keeps the previous one around to compute deltas and never persists them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use crate::error::CollectionError;

use super::metrics::{now_millis, ProcessIdentity, Timestamp};

/// Raw counters for one process at the instant of a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RawProcess {
    pub identity: ProcessIdentity,
    /// Cumulative CPU time across all cores, milliseconds
    pub cpu_time_ms: u64,
    pub memory_bytes: u64,
    /// Cumulative bytes read since the process started
    pub disk_read_total: u64,
    /// Cumulative bytes written since the process started
    pub disk_write_total: u64,
}

/// One read of the process table, ordered by pid
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    /// Logical CPUs; bounds the CPU percentage at `100 * cpu_count`
    pub cpu_count: usize,
    pub processes: Vec<RawProcess>,
    /// Processes whose counters could not be read
    pub skipped: usize,
}

impl Snapshot {
    pub fn new(timestamp: Timestamp, cpu_count: usize, mut processes: Vec<RawProcess>) -> Self {
        processes.sort_by_key(|p| p.identity.key());
        Self {
            timestamp,
            cpu_count,
            processes,
            skipped: 0,
        }
    }

    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped = skipped;
        self
    }
}

/// Anything that can produce process table snapshots
pub trait SnapshotSource: Send {
    fn read(&mut self) -> Result<Snapshot, CollectionError>;
}

/// A snapshot source shared between the sampler and process-control callers.
///
/// The mutex doubles as the reader gate: process actions take it briefly so
/// they never land in the middle of a table read.
pub type SharedSource = Arc<Mutex<Box<dyn SnapshotSource>>>;

pub fn shared_source<S: SnapshotSource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Read a snapshot on a blocking worker, giving up after `timeout`.
///
/// A stalled read keeps running on its worker; later calls fail fast with
/// [`CollectionError::ReaderBusy`] until it returns.
pub async fn read_bounded(
    source: &SharedSource,
    timeout: Duration,
) -> Result<Snapshot, CollectionError> {
    let source = Arc::clone(source);
    let lock_wait = timeout / 4;

    let task = tokio::task::spawn_blocking(move || {
        let mut guard = source
            .try_lock_for(lock_wait)
            .ok_or(CollectionError::ReaderBusy)?;
        guard.read()
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CollectionError::Task(join_err.to_string())),
        Err(_) => Err(CollectionError::Timeout(timeout)),
    }
}

/// Reads the live process table through `sysinfo`
pub struct SysinfoReader {
    system: System,
    cpu_count: usize,
}

impl SysinfoReader {
    pub fn new() -> Self {
        let system =
            System::new_with_specifics(RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()));
        let cpu_count = match system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };

        Self { system, cpu_count }
    }
}

impl Default for SysinfoReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for SysinfoReader {
    fn read(&mut self) -> Result<Snapshot, CollectionError> {
        let refresh = ProcessRefreshKind::nothing()
            .with_cpu()
            .with_memory()
            .with_disk_usage();
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);
        let timestamp = now_millis();

        let table = self.system.processes();
        if table.is_empty() {
            return Err(CollectionError::TableUnreadable(
                "no processes visible".to_string(),
            ));
        }

        let mut skipped = 0;
        let processes: Vec<RawProcess> = table
            .values()
            // Linux lists threads as tasks; they are not processes of their own
            .filter(|proc| proc.thread_kind().is_none())
            .filter_map(|proc| {
                let start_time = proc.start_time();
                if start_time == 0 {
                    skipped += 1;
                    return None;
                }
                let disk = proc.disk_usage();
                Some(RawProcess {
                    identity: ProcessIdentity::new(
                        proc.pid().as_u32(),
                        i64::try_from(start_time).unwrap_or(i64::MAX),
                        proc.name().to_string_lossy().to_string(),
                    ),
                    cpu_time_ms: proc.accumulated_cpu_time(),
                    memory_bytes: proc.memory(),
                    disk_read_total: disk.total_read_bytes,
                    disk_write_total: disk.total_written_bytes,
                })
            })
            .collect();

        if skipped > 0 {
            log::debug!("Skipped {} unreadable processes", skipped);
        }

        Ok(Snapshot::new(timestamp, self.cpu_count, processes).with_skipped(skipped))
    }
}

/// One scripted read
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Table(Snapshot),
    Fail(String),
}

/// Replays a prepared sequence of reads. Once the script runs out every
/// read fails, so a sampler driven by it keeps running but stops writing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    pub fn from_tables(tables: impl IntoIterator<Item = Snapshot>) -> Self {
        Self::new(tables.into_iter().map(ScriptStep::Table))
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl SnapshotSource for ScriptedSource {
    fn read(&mut self) -> Result<Snapshot, CollectionError> {
        match self.steps.pop_front() {
            Some(ScriptStep::Table(snapshot)) => Ok(snapshot),
            Some(ScriptStep::Fail(reason)) => Err(CollectionError::TableUnreadable(reason)),
            None => Err(CollectionError::TableUnreadable(
                "script exhausted".to_string(),
            )),
        }
    }
}
