//! Read-side queries: trends, downsampled aggregates, rankings, summaries.
//!
//! Never mutates the store. Identical store state and arguments always give
//! identical output; a window without data gives an empty result, not an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;

use super::metrics::{
    AggregateBucket, Metric, ProcessAnalysis, ProcessIdentity, RankedRow, Reduction, Sample,
    SystemSummary, TimeWindow, Timestamp,
};
use super::store::Store;

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<Store>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Raw samples for one process, oldest first
    pub fn series(
        &self,
        identity: &ProcessIdentity,
        window: TimeWindow,
    ) -> Result<Vec<Sample>, StoreError> {
        self.store
            .query_range(identity, window.start, window.end)?
            .collect()
    }

    pub fn top_n(&self, metric: Metric, at: Timestamp, n: usize) -> Result<Vec<RankedRow>, StoreError> {
        self.store.query_top_n(metric, at, n)
    }

    pub fn top_n_fresh(
        &self,
        metric: Metric,
        at: Timestamp,
        n: usize,
        max_staleness: Option<Duration>,
    ) -> Result<Vec<RankedRow>, StoreError> {
        self.store.query_top_n_fresh(metric, at, n, max_staleness)
    }

    /// Whole-host aggregate for every metric.
    ///
    /// Processes are first summed per sampling instant; each bucket then
    /// holds the mean of those totals for CPU and memory and their sum for
    /// disk traffic.
    pub fn system_aggregate(
        &self,
        window: TimeWindow,
        bucket_width: Duration,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        self.system_aggregate_for(window, bucket_width, &Metric::ALL)
    }

    pub fn system_aggregate_for(
        &self,
        window: TimeWindow,
        bucket_width: Duration,
        metrics: &[Metric],
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        let width = bucket_width_millis(bucket_width)?;
        let totals = self.store.query_window_totals(window)?;
        Ok(bucketize(
            &totals,
            window,
            width,
            metrics,
            |t| t.timestamp,
            |t, metric| t.value(metric),
        ))
    }

    /// Downsampled trend of one metric for one process
    pub fn process_buckets(
        &self,
        identity: &ProcessIdentity,
        window: TimeWindow,
        bucket_width: Duration,
        metric: Metric,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        let width = bucket_width_millis(bucket_width)?;
        let samples = self.series(identity, window)?;
        Ok(bucketize(
            &samples,
            window,
            width,
            &[metric],
            |s| s.timestamp,
            |s, metric| s.value(metric),
        ))
    }

    /// Mean and peak host usage over `window`
    pub fn system_summary(&self, window: TimeWindow) -> Result<SystemSummary, StoreError> {
        let totals = self.store.query_window_totals(window)?;
        let (Some(first), Some(last)) = (totals.first(), totals.last()) else {
            return Ok(SystemSummary::default());
        };

        let n = totals.len() as f64;
        let cpu_sum: f64 = totals.iter().map(|t| t.cpu_percent).sum();
        let memory_sum: f64 = totals.iter().map(|t| t.memory_bytes as f64).sum();
        let process_sum: u64 = totals.iter().map(|t| t.process_count).sum();

        Ok(SystemSummary {
            cpu_avg: cpu_sum / n,
            cpu_max: totals.iter().map(|t| t.cpu_percent).fold(0.0, f64::max),
            memory_avg: memory_sum / n,
            memory_max: totals
                .iter()
                .map(|t| t.memory_bytes as f64)
                .fold(0.0, f64::max),
            disk_read_total: totals.iter().map(|t| t.disk_read_bytes).sum(),
            disk_write_total: totals.iter().map(|t| t.disk_write_bytes).sum(),
            processes_avg: process_sum / totals.len() as u64,
            first_timestamp: Some(first.timestamp),
            last_timestamp: Some(last.timestamp),
            data_points: totals.len(),
        })
    }

    /// Mean and peak usage of every process instance called `name`
    pub fn process_analysis(
        &self,
        name: &str,
        window: TimeWindow,
    ) -> Result<ProcessAnalysis, StoreError> {
        let mut analysis = ProcessAnalysis {
            name: name.to_string(),
            ..Default::default()
        };
        let mut cpu_sum = 0.0;
        let mut memory_sum = 0.0;

        for identity in self.store.identities_by_name(name)? {
            let samples = self.series(&identity, window)?;
            if samples.is_empty() {
                continue;
            }
            for sample in &samples {
                cpu_sum += sample.cpu_percent;
                memory_sum += sample.memory_bytes as f64;
                analysis.cpu_max = analysis.cpu_max.max(sample.cpu_percent);
                analysis.memory_max = analysis.memory_max.max(sample.memory_bytes);
            }
            analysis.data_points += samples.len();
            analysis.identities.push(identity);
        }

        if analysis.data_points > 0 {
            analysis.cpu_avg = cpu_sum / analysis.data_points as f64;
            analysis.memory_avg = memory_sum / analysis.data_points as f64;
        }
        Ok(analysis)
    }
}

fn bucket_width_millis(width: Duration) -> Result<i64, StoreError> {
    match i64::try_from(width.as_millis()) {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(StoreError::invalid_value(format!(
            "bucket width {:?} must be between 1ms and i64::MAX ms",
            width
        ))),
    }
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    sums: [f64; Metric::ALL.len()],
}

/// Group time-ordered points into fixed-width buckets aligned at
/// `window.start` and reduce each metric per bucket.
///
/// The last bucket is clipped to `window.end` and also takes a point lying
/// exactly on `window.end`. Buckets without points are left out. Output is
/// ordered by bucket start, then by the order of `metrics`.
pub fn bucketize<T>(
    points: &[T],
    window: TimeWindow,
    width_ms: i64,
    metrics: &[Metric],
    timestamp: impl Fn(&T) -> Timestamp,
    value: impl Fn(&T, Metric) -> f64,
) -> Vec<AggregateBucket> {
    if window.is_empty() || width_ms <= 0 {
        return Vec::new();
    }

    let span = i128::from(window.end) - i128::from(window.start);
    let width = i128::from(width_ms);
    let bucket_count = ((span + width - 1) / width).max(1);

    let mut buckets: BTreeMap<i128, Accumulator> = BTreeMap::new();
    for point in points {
        let ts = timestamp(point);
        if !window.contains(ts) {
            continue;
        }
        let index = ((i128::from(ts) - i128::from(window.start)) / width).min(bucket_count - 1);
        let acc = buckets.entry(index).or_default();
        acc.count += 1;
        for (slot, metric) in Metric::ALL.iter().enumerate() {
            acc.sums[slot] += value(point, *metric);
        }
    }

    let mut out = Vec::with_capacity(buckets.len() * metrics.len());
    for (index, acc) in buckets {
        let start = i128::from(window.start) + index * width;
        let end = (start + width).min(i128::from(window.end));
        for metric in metrics {
            let slot = Metric::ALL
                .iter()
                .position(|m| m == metric)
                .unwrap_or_default();
            let value = match metric.reduction() {
                Reduction::Mean => acc.sums[slot] / acc.count as f64,
                Reduction::Sum => acc.sums[slot],
            };
            out.push(AggregateBucket {
                window_start: start as Timestamp,
                window_end: end as Timestamp,
                metric: *metric,
                value,
            });
        }
    }
    out
}
