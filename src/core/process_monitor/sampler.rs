//! The sampling iteration.
//!
//! Each iteration takes a snapshot, turns it into samples using the
//! previous snapshot for deltas, and hands the batch to the store. Failures
//! are contained here: they are logged and counted, never propagated.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::metrics::{MetricFamily, Sample, Timestamp};
use super::snapshot::{read_bounded, RawProcess, SharedSource, Snapshot};
use super::store::Store;

/// Per-sampler settings
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub metrics_enabled: BTreeSet<MetricFamily>,
    pub read_timeout: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            metrics_enabled: [MetricFamily::Cpu, MetricFamily::Memory, MetricFamily::Disk]
                .into_iter()
                .collect(),
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Counters shared between the sampling loop and its observers
#[derive(Debug, Default)]
pub struct SamplerStats {
    iterations: AtomicU64,
    samples_written: AtomicU64,
    collection_errors: AtomicU64,
    store_errors: AtomicU64,
    lost_samples: AtomicU64,
    skipped_processes: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`SamplerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub iterations: u64,
    pub samples_written: u64,
    pub collection_errors: u64,
    pub store_errors: u64,
    pub lost_samples: u64,
    /// Unreadable processes in the most recent snapshot
    pub skipped_processes: u64,
    pub last_error: Option<String>,
}

impl SamplerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            collection_errors: self.collection_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            lost_samples: self.lost_samples.load(Ordering::Relaxed),
            skipped_processes: self.skipped_processes.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }
}

/// What a single iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The batch (plus any carried-over batch) was committed
    Written { samples: usize },
    /// The snapshot could not be read; the previous snapshot is kept
    CollectionFailed,
    /// The write failed twice; `pending` samples wait for the next
    /// iteration and `dropped` carried-over samples were discarded
    WriteFailed { pending: usize, dropped: usize },
}

/// Single writer feeding the store.
///
/// Owns the previous snapshot, so separate samplers never share delta state.
pub struct Sampler {
    source: SharedSource,
    store: Arc<Store>,
    settings: SamplerSettings,
    previous: Option<Snapshot>,
    /// Newest timestamp handed to the store; survives `reset`
    last_timestamp: Option<Timestamp>,
    pending: Option<Vec<Sample>>,
    stats: Arc<SamplerStats>,
    batches: Option<Arc<watch::Sender<Option<Timestamp>>>>,
}

impl Sampler {
    /// Create a sampler whose timestamps continue after the newest sample
    /// already in `store`
    pub fn new(source: SharedSource, store: Arc<Store>, settings: SamplerSettings) -> Self {
        let last_timestamp = match store.latest_timestamp() {
            Ok(latest) => latest,
            Err(err) => {
                warn!("Could not read the newest stored timestamp: {}", err);
                None
            }
        };

        Self {
            source,
            store,
            settings,
            previous: None,
            last_timestamp,
            pending: None,
            stats: Arc::new(SamplerStats::default()),
            batches: None,
        }
    }

    /// Share counters with an outside observer
    pub fn with_stats(mut self, stats: Arc<SamplerStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Publish the timestamp of every committed batch
    pub fn with_batch_notifier(mut self, batches: Arc<watch::Sender<Option<Timestamp>>>) -> Self {
        self.batches = Some(batches);
        self
    }

    pub fn stats(&self) -> Arc<SamplerStats> {
        Arc::clone(&self.stats)
    }

    /// Forget the retained snapshot; the next sample of every process has
    /// zero CPU and disk deltas. Timestamps keep increasing across a reset.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Samples waiting for a retry after a failed write
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, Vec::len)
    }

    /// Run one sampling iteration
    pub async fn iterate(&mut self) -> IterationOutcome {
        self.stats.iterations.fetch_add(1, Ordering::Relaxed);

        let mut current = match read_bounded(&self.source, self.settings.read_timeout).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("Snapshot read failed, skipping iteration: {}", err);
                self.stats.collection_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());
                return IterationOutcome::CollectionFailed;
            }
        };
        self.stats
            .skipped_processes
            .store(current.skipped as u64, Ordering::Relaxed);

        if let Some(last) = self.last_timestamp {
            if current.timestamp <= last {
                current.timestamp = last + 1;
            }
        }
        self.last_timestamp = Some(current.timestamp);

        let batch = derive_samples(
            self.previous.as_ref(),
            &current,
            &self.settings.metrics_enabled,
        );
        let batch_ts = current.timestamp;
        self.previous = Some(current);

        self.write(batch, batch_ts).await
    }

    async fn write(&mut self, batch: Vec<Sample>, batch_ts: Timestamp) -> IterationOutcome {
        let mut to_write = self.pending.take().unwrap_or_default();
        let carried = to_write.len();
        to_write.extend(batch);
        if to_write.is_empty() {
            return IterationOutcome::Written { samples: 0 };
        }

        let attempted = to_write.len();
        let store = Arc::clone(&self.store);
        let attempt = tokio::task::spawn_blocking(move || {
            let result = match store.append(&to_write) {
                Ok(report) => Ok(report),
                Err(err) => {
                    warn!("Store append failed, retrying once: {}", err);
                    store.append(&to_write)
                }
            };
            (to_write, result)
        })
        .await;

        let (mut to_write, result) = match attempt {
            Ok(done) => done,
            Err(join_err) => return self.abandon(attempted, join_err.to_string()),
        };

        match result {
            Ok(report) => {
                self.stats
                    .samples_written
                    .fetch_add(report.inserted as u64, Ordering::Relaxed);
                if let Some(batches) = &self.batches {
                    batches.send_replace(Some(batch_ts));
                }
                debug!(
                    "Committed {} samples ({} evicted by retention)",
                    report.inserted, report.evicted
                );
                IterationOutcome::Written {
                    samples: report.inserted,
                }
            }
            Err(err) => {
                self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());

                if carried > 0 {
                    to_write.drain(..carried);
                    self.stats
                        .lost_samples
                        .fetch_add(carried as u64, Ordering::Relaxed);
                    error!(
                        "Dropped {} samples after repeated store failures: {}",
                        carried, err
                    );
                } else {
                    warn!(
                        "Store append failed twice, keeping {} samples for the next iteration: {}",
                        to_write.len(),
                        err
                    );
                }

                let pending = to_write.len();
                self.pending = Some(to_write);
                IterationOutcome::WriteFailed {
                    pending,
                    dropped: carried,
                }
            }
        }
    }

    /// Give up on samples whose write can no longer be retried
    fn abandon(&mut self, samples: usize, reason: String) -> IterationOutcome {
        error!(
            "Store writer task failed, dropped {} samples: {}",
            samples, reason
        );
        self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
        self.stats
            .lost_samples
            .fetch_add(samples as u64, Ordering::Relaxed);
        self.stats.record_error(reason);
        IterationOutcome::WriteFailed {
            pending: 0,
            dropped: samples,
        }
    }
}

/// Turn a snapshot into samples, using `previous` for deltas.
///
/// CPU percent is CPU time consumed over elapsed wall time, clamped to
/// `[0, 100 * cpu_count]`. Processes absent from `previous` get zero CPU and
/// disk deltas. Processes that only appear in `previous` are dropped.
/// Disabled metric families are recorded as zero.
pub fn derive_samples(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    enabled: &BTreeSet<MetricFamily>,
) -> Vec<Sample> {
    let prior: HashMap<(u32, i64), &RawProcess> = previous
        .map(|snapshot| {
            snapshot
                .processes
                .iter()
                .map(|p| (p.identity.key(), p))
                .collect()
        })
        .unwrap_or_default();
    let elapsed_ms = previous
        .map(|snapshot| current.timestamp - snapshot.timestamp)
        .filter(|ms| *ms > 0);
    let max_cpu = 100.0 * current.cpu_count.max(1) as f64;

    let cpu_on = enabled.contains(&MetricFamily::Cpu);
    let memory_on = enabled.contains(&MetricFamily::Memory);
    let disk_on = enabled.contains(&MetricFamily::Disk);

    current
        .processes
        .iter()
        .map(|proc| {
            let before = prior.get(&proc.identity.key());
            let (cpu, read, written) = match (before, elapsed_ms) {
                (Some(before), Some(elapsed)) => {
                    let cpu_ms = proc.cpu_time_ms.saturating_sub(before.cpu_time_ms);
                    (
                        (cpu_ms as f64 / elapsed as f64 * 100.0).clamp(0.0, max_cpu),
                        proc.disk_read_total.saturating_sub(before.disk_read_total),
                        proc.disk_write_total.saturating_sub(before.disk_write_total),
                    )
                }
                _ => (0.0, 0, 0),
            };

            Sample {
                identity: proc.identity.clone(),
                timestamp: current.timestamp,
                cpu_percent: if cpu_on { cpu } else { 0.0 },
                memory_bytes: if memory_on { proc.memory_bytes } else { 0 },
                disk_read_bytes: if disk_on { read } else { 0 },
                disk_write_bytes: if disk_on { written } else { 0 },
            }
        })
        .collect()
}
