use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

/// Unix timestamp in milliseconds
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`]
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// A logical process: a pid paired with its start time.
///
/// The OS recycles pids, so two observations only refer to the same process
/// when both `pid` and `start_time` match. `name` is for display only and
/// takes no part in equality or hashing; `exec` can change it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    /// Process start time, Unix seconds
    pub start_time: i64,
    pub name: String,
}

impl ProcessIdentity {
    pub fn new(pid: u32, start_time: i64, name: impl Into<String>) -> Self {
        Self {
            pid,
            start_time,
            name: name.into(),
        }
    }

    pub fn key(&self) -> (u32, i64) {
        (self.pid, self.start_time)
    }
}

impl PartialEq for ProcessIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ProcessIdentity {}

impl Hash for ProcessIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{})", self.name, self.pid, self.start_time)
    }
}

/// One process's derived metrics at one instant. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub identity: ProcessIdentity,
    pub timestamp: Timestamp,
    /// Range [0, 100 * logical cores]
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// Bytes read since the previous sample
    pub disk_read_bytes: u64,
    /// Bytes written since the previous sample
    pub disk_write_bytes: u64,
}

impl Sample {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::CpuPercent => self.cpu_percent,
            Metric::MemoryBytes => self.memory_bytes as f64,
            Metric::DiskReadBytes => self.disk_read_bytes as f64,
            Metric::DiskWriteBytes => self.disk_write_bytes as f64,
        }
    }
}

/// Metric families that can be switched on and off in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFamily {
    Cpu,
    Memory,
    Disk,
}

/// A queryable per-sample metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuPercent,
    MemoryBytes,
    DiskReadBytes,
    DiskWriteBytes,
}

/// How samples of a metric collapse into a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::CpuPercent,
        Metric::MemoryBytes,
        Metric::DiskReadBytes,
        Metric::DiskWriteBytes,
    ];

    pub fn family(self) -> MetricFamily {
        match self {
            Metric::CpuPercent => MetricFamily::Cpu,
            Metric::MemoryBytes => MetricFamily::Memory,
            Metric::DiskReadBytes | Metric::DiskWriteBytes => MetricFamily::Disk,
        }
    }

    /// CPU and memory are levels, disk counters are per-interval deltas
    pub fn reduction(self) -> Reduction {
        match self {
            Metric::CpuPercent | Metric::MemoryBytes => Reduction::Mean,
            Metric::DiskReadBytes | Metric::DiskWriteBytes => Reduction::Sum,
        }
    }

    /// Name of the backing column in the samples table
    pub(crate) fn column(self) -> &'static str {
        match self {
            Metric::CpuPercent => "cpu_percent",
            Metric::MemoryBytes => "memory_bytes",
            Metric::DiskReadBytes => "disk_read_bytes",
            Metric::DiskWriteBytes => "disk_write_bytes",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::CpuPercent => "cpu",
            Metric::MemoryBytes => "memory",
            Metric::DiskReadBytes => "disk-read",
            Metric::DiskWriteBytes => "disk-write",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "cpu_percent" => Ok(Metric::CpuPercent),
            "memory" | "mem" | "memory_bytes" => Ok(Metric::MemoryBytes),
            "disk-read" | "read" | "disk_read_bytes" => Ok(Metric::DiskReadBytes),
            "disk-write" | "write" | "disk_write_bytes" => Ok(Metric::DiskWriteBytes),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

/// Inclusive time range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// The `span` leading up to and including `end`
    pub fn ending_at(end: Timestamp, span: Duration) -> Self {
        let span_ms = i64::try_from(span.as_millis()).unwrap_or(i64::MAX);
        Self {
            start: end.saturating_sub(span_ms),
            end,
        }
    }

    /// The `span` leading up to now
    pub fn last(span: Duration) -> Self {
        Self::ending_at(now_millis(), span)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// A downsampled value over a fixed-width slice of a window.
/// Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub metric: Metric,
    pub value: f64,
}

/// One entry of a top-N ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    pub identity: ProcessIdentity,
    pub value: f64,
}

/// Bounds on how long and how much the store keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_row_count: u64,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration, max_row_count: u64) -> Self {
        Self {
            max_age,
            max_row_count,
        }
    }

    pub(crate) fn max_age_millis(&self) -> i64 {
        i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            max_row_count: 1_000_000,
        }
    }
}

/// All processes summed at one sampling instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemTotals {
    pub timestamp: Timestamp,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub process_count: u64,
}

impl SystemTotals {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::CpuPercent => self.cpu_percent,
            Metric::MemoryBytes => self.memory_bytes as f64,
            Metric::DiskReadBytes => self.disk_read_bytes as f64,
            Metric::DiskWriteBytes => self.disk_write_bytes as f64,
        }
    }
}

/// Mean/max overview of the whole host over a window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_avg: f64,
    pub memory_max: f64,
    pub disk_read_total: u64,
    pub disk_write_total: u64,
    pub processes_avg: u64,
    pub first_timestamp: Option<Timestamp>,
    pub last_timestamp: Option<Timestamp>,
    pub data_points: usize,
}

/// Mean/max overview of every process sharing a name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessAnalysis {
    pub name: String,
    pub identities: Vec<ProcessIdentity>,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_avg: f64,
    pub memory_max: u64,
    pub data_points: usize,
}

/// A process-control request forwarded to the operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessAction {
    Terminate,
    Suspend,
    Resume,
    /// Unix nice value, -20 (highest) to 19 (lowest)
    SetPriority(i32),
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessAction::Terminate => f.write_str("terminate"),
            ProcessAction::Suspend => f.write_str("suspend"),
            ProcessAction::Resume => f.write_str("resume"),
            ProcessAction::SetPriority(nice) => write!(f, "set-priority({})", nice),
        }
    }
}
