use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::StoreError;

use super::metrics::{Metric, RankedRow, Timestamp};
use super::query::QueryEngine;

/// A top-N ranking that refreshes after every committed sampling batch.
///
/// Ends (yields `None`) once the monitor that produced it is dropped.
pub struct TopNSubscription {
    engine: QueryEngine,
    metric: Metric,
    n: usize,
    max_staleness: Option<Duration>,
    batches: watch::Receiver<Option<Timestamp>>,
    handle: Handle,
}

impl TopNSubscription {
    pub(crate) fn new(
        engine: QueryEngine,
        metric: Metric,
        n: usize,
        max_staleness: Option<Duration>,
        batches: watch::Receiver<Option<Timestamp>>,
        handle: Handle,
    ) -> Self {
        Self {
            engine,
            metric,
            n,
            max_staleness,
            batches,
            handle,
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Ranking as of the most recent committed batch, without waiting.
    /// Empty before the first batch.
    pub fn current(&self) -> Result<Vec<RankedRow>, StoreError> {
        match *self.batches.borrow() {
            Some(at) => self.rank_at(at),
            None => Ok(Vec::new()),
        }
    }

    /// Wait for the next committed batch and rank as of its timestamp
    pub async fn next_ranking(&mut self) -> Option<Result<Vec<RankedRow>, StoreError>> {
        loop {
            self.batches.changed().await.ok()?;
            let latest = *self.batches.borrow_and_update();
            if let Some(at) = latest {
                return Some(self.rank_at(at));
            }
        }
    }

    fn rank_at(&self, at: Timestamp) -> Result<Vec<RankedRow>, StoreError> {
        self.engine
            .top_n_fresh(self.metric, at, self.n, self.max_staleness)
    }
}

/// Blocking iteration for synchronous callers such as a UI thread.
///
/// Must not be driven from inside an async task.
impl Iterator for TopNSubscription {
    type Item = Result<Vec<RankedRow>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.handle.clone();
        handle.block_on(self.next_ranking())
    }
}
