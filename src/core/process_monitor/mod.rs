//! Process monitoring core.
//!
//! Samples the local process table on a fixed cadence, persists the derived
//! metrics as a time series, and answers trend and ranking queries over it.

mod cursor;
mod metrics;
mod query;
mod runtime;
mod sampler;
mod snapshot;
mod store;
mod subscription;

pub use cursor::SampleCursor;
pub use metrics::{
    now_millis, AggregateBucket, Metric, MetricFamily, ProcessAction, ProcessAnalysis,
    ProcessIdentity, RankedRow, Reduction, RetentionPolicy, Sample, SystemSummary, SystemTotals,
    TimeWindow, Timestamp,
};
pub use query::{bucketize, QueryEngine};
pub use runtime::{Monitor, MonitorSettings, SamplerState, MIN_SAMPLING_INTERVAL};
pub use sampler::{
    derive_samples, IterationOutcome, Sampler, SamplerSettings, SamplerStats, StatsSnapshot,
};
pub use snapshot::{
    read_bounded, shared_source, RawProcess, ScriptStep, ScriptedSource, SharedSource, Snapshot,
    SnapshotSource, SysinfoReader,
};
pub use store::{AppendReport, Store, SCHEMA_VERSION};
pub use subscription::TopNSubscription;
