//! Tokio runtime and control surface for the sampler.
//!
//! [`Monitor`] owns the background runtime, the shared store and the sampler
//! lifecycle. Its methods are blocking and meant to be called from ordinary
//! threads (a CLI, a UI thread), never from inside an async task.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::core::config::Config;
use crate::error::{ActionError, ControlError, StoreError};
use crate::platform::process_control;

use super::metrics::{
    AggregateBucket, Metric, ProcessAction, ProcessIdentity, Sample, TimeWindow, Timestamp,
};
use super::query::QueryEngine;
use super::sampler::{Sampler, SamplerSettings, SamplerStats, StatsSnapshot};
use super::snapshot::{shared_source, SharedSource, SnapshotSource, SysinfoReader};
use super::store::Store;
use super::subscription::TopNSubscription;

/// Shortest accepted sampling period
pub const MIN_SAMPLING_INTERVAL: Duration = Duration::from_millis(50);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Default)]
pub struct MonitorSettings {
    pub sampler: SamplerSettings,
    /// Processes silent for longer than this drop out of top-N
    /// subscriptions; `None` means three sampling intervals
    pub top_staleness: Option<Duration>,
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            sampler: SamplerSettings {
                metrics_enabled: config.metrics_enabled.clone(),
                read_timeout: config.read_timeout(),
            },
            top_staleness: config.top_staleness_ms.map(Duration::from_millis),
        }
    }
}

struct RunningSampler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Sampler>,
}

/// Process monitor: sampler lifecycle, process control, and query access
pub struct Monitor {
    store: Arc<Store>,
    source: SharedSource,
    settings: MonitorSettings,
    stats: Arc<SamplerStats>,
    state: Mutex<SamplerState>,
    interval_tx: watch::Sender<Duration>,
    batches: Arc<watch::Sender<Option<Timestamp>>>,
    running: Mutex<Option<RunningSampler>>,
    parked: Mutex<Option<Sampler>>,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Monitor {
    /// Open the configured store and monitor the live process table
    pub fn open(config: &Config) -> crate::Result<Self> {
        config.validate()?;
        let store = Store::open(
            &config.data_path()?,
            config.retention_policy(),
            config.store_busy_timeout(),
        )?;

        let monitor = Self::with_source(
            Arc::new(store),
            SysinfoReader::new(),
            MonitorSettings::from(config),
        )?;
        monitor.interval_tx.send_replace(config.sampling_interval());
        Ok(monitor)
    }

    /// Build a monitor over any snapshot source
    pub fn with_source<S: SnapshotSource + 'static>(
        store: Arc<Store>,
        source: S,
        settings: MonitorSettings,
    ) -> Result<Self, ControlError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .thread_name("procwatch-sampler")
            .build()?;

        let source = shared_source(source);
        let stats = Arc::new(SamplerStats::default());
        let (batches, _) = watch::channel(None);
        let batches = Arc::new(batches);
        let (interval_tx, _) = watch::channel(Duration::from_millis(2_000));

        let sampler = Sampler::new(
            Arc::clone(&source),
            Arc::clone(&store),
            settings.sampler.clone(),
        )
        .with_stats(Arc::clone(&stats))
        .with_batch_notifier(Arc::clone(&batches));

        Ok(Self {
            store,
            source,
            settings,
            stats,
            state: Mutex::new(SamplerState::Stopped),
            interval_tx,
            batches,
            running: Mutex::new(None),
            parked: Mutex::new(Some(sampler)),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Stopped → Running: begin sampling every `interval`.
    ///
    /// The first iteration runs immediately. A restarted sampler forgets its
    /// previous snapshot, so the first samples after a restart have zero CPU.
    pub fn start(&self, interval: Duration) -> Result<(), ControlError> {
        validate_interval(interval)?;

        let mut state = self.state.lock();
        if *state != SamplerState::Stopped {
            return Err(ControlError::AlreadyRunning);
        }

        let mut sampler = self
            .parked
            .lock()
            .take()
            .unwrap_or_else(|| self.fresh_sampler());
        sampler.reset();

        self.interval_tx.send_replace(interval);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = self
            .handle
            .spawn(run_loop(sampler, self.interval_tx.subscribe(), shutdown_rx));

        *self.running.lock() = Some(RunningSampler {
            shutdown_tx,
            handle,
        });
        *state = SamplerState::Running;
        info!("Sampler started with interval {:?}", interval);
        Ok(())
    }

    /// Running → Stopping → Stopped.
    ///
    /// Lets the in-flight iteration finish (including its write) and
    /// returns once the loop has exited.
    pub fn stop(&self) -> Result<(), ControlError> {
        {
            let mut state = self.state.lock();
            if *state != SamplerState::Running {
                return Err(ControlError::NotRunning);
            }
            *state = SamplerState::Stopping;
        }

        let running = self.running.lock().take();
        if let Some(running) = running {
            running.shutdown_tx.send_replace(true);
            match self.handle.block_on(running.handle) {
                Ok(sampler) => *self.parked.lock() = Some(sampler),
                Err(err) => error!("Sampler task ended abnormally: {}", err),
            }
        }

        *self.state.lock() = SamplerState::Stopped;
        info!("Sampler stopped");
        Ok(())
    }

    /// Change the sampling period; takes effect when the next iteration starts
    pub fn set_interval(&self, interval: Duration) -> Result<(), ControlError> {
        validate_interval(interval)?;
        self.interval_tx.send_replace(interval);
        debug!("Sampling interval set to {:?}", interval);
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    pub fn state(&self) -> SamplerState {
        *self.state.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Forward a process-control request to the operating system.
    ///
    /// Waits at most one read timeout for an in-flight snapshot read, then
    /// goes ahead regardless. Never touches sampler state.
    pub fn issue_process_action(&self, pid: u32, action: ProcessAction) -> Result<(), ActionError> {
        let gate = self.source.try_lock_for(self.settings.sampler.read_timeout);
        if gate.is_none() {
            debug!(
                "Snapshot read still running; issuing {} on PID {} without waiting",
                action, pid
            );
        }

        let result = process_control::apply(pid, action);
        drop(gate);

        match &result {
            Ok(()) => info!("Applied {} to PID {}", action, pid),
            Err(err) => warn!("{}", err),
        }
        result
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub fn query(&self) -> QueryEngine {
        QueryEngine::new(Arc::clone(&self.store))
    }

    /// Raw samples of one process inside `window`, oldest first
    pub fn get_series(
        &self,
        identity: &ProcessIdentity,
        window: TimeWindow,
    ) -> Result<Vec<Sample>, StoreError> {
        self.query().series(identity, window)
    }

    /// Whole-host buckets for every enabled metric
    pub fn get_system_aggregate(
        &self,
        window: TimeWindow,
        bucket_width: Duration,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        let metrics: Vec<Metric> = Metric::ALL
            .into_iter()
            .filter(|m| self.settings.sampler.metrics_enabled.contains(&m.family()))
            .collect();
        self.query()
            .system_aggregate_for(window, bucket_width, &metrics)
    }

    /// Ranking of the top `n` processes by `metric`, refreshed after each batch
    pub fn subscribe_top_n(&self, metric: Metric, n: usize) -> TopNSubscription {
        let staleness = self
            .settings
            .top_staleness
            .unwrap_or_else(|| self.interval() * 3);
        TopNSubscription::new(
            self.query(),
            metric,
            n,
            Some(staleness),
            self.batches.subscribe(),
            self.handle.clone(),
        )
    }

    fn fresh_sampler(&self) -> Sampler {
        Sampler::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.settings.sampler.clone(),
        )
        .with_stats(Arc::clone(&self.stats))
        .with_batch_notifier(Arc::clone(&self.batches))
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // Blocking is not allowed inside an async task
        let in_async = Handle::try_current().is_ok();

        if *self.state.get_mut() == SamplerState::Running && !in_async {
            let _ = self.stop();
        } else if let Some(running) = self.running.get_mut().take() {
            running.shutdown_tx.send_replace(true);
        }

        if let Some(runtime) = self.runtime.take() {
            if in_async {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            }
        }
    }
}

fn validate_interval(interval: Duration) -> Result<(), ControlError> {
    if interval < MIN_SAMPLING_INTERVAL {
        return Err(ControlError::InvalidInterval(interval));
    }
    Ok(())
}

/// The periodic sampling loop.
///
/// Shutdown is only observed between iterations, so a write is never cut
/// off halfway. Returns the sampler so a later start can reuse it.
async fn run_loop(
    mut sampler: Sampler,
    mut interval_rx: watch::Receiver<Duration>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Sampler {
    let mut period = *interval_rx.borrow_and_update();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if interval_rx.has_changed().unwrap_or(false) {
                    let next = *interval_rx.borrow_and_update();
                    if next != period {
                        period = next;
                        ticker = interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        info!("Sampling interval changed to {:?}", period);
                    }
                }

                let outcome = sampler.iterate().await;
                trace!("Sampler iteration finished: {:?}", outcome);
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    sampler
}
