use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use contact_common::contact::{Contact, PendingUpdate};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::metrics_consts::{BATCH_FLUSHES, BATCH_FLUSH_FAILURES, BATCH_FLUSH_TIME, BATCH_SIZE};
use crate::pipeline::BatchingConfig;

/// What caused a batch to be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached the configured size.
    Size,
    /// The flush timer elapsed.
    Timer,
    /// The input queue was closed and drained.
    Closed,
    /// Shutdown was requested.
    Cancelled,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Closed => "closed",
            FlushTrigger::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sends a full batch somewhere. Implementations must not keep the batch around: the aggregator
/// clears it as soon as `flush` returns.
#[async_trait]
pub trait BatchFlusher: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn flush(&self, batch: &[Self::Item]) -> Result<(), DirectoryError>;
}

/// Flushes contacts that don't exist remotely yet to the bulk create endpoint.
pub struct CreateFlusher<D> {
    directory: Arc<D>,
}

impl<D> CreateFlusher<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<D: Directory> BatchFlusher for CreateFlusher<D> {
    type Item = Contact;

    fn name(&self) -> &'static str {
        "create"
    }

    async fn flush(&self, batch: &[Contact]) -> Result<(), DirectoryError> {
        self.directory.bulk_create(batch).await
    }
}

/// Flushes contacts that were found remotely to the bulk update endpoint.
pub struct UpdateFlusher<D> {
    directory: Arc<D>,
}

impl<D> UpdateFlusher<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<D: Directory> BatchFlusher for UpdateFlusher<D> {
    type Item = PendingUpdate;

    fn name(&self) -> &'static str {
        "update"
    }

    async fn flush(&self, batch: &[PendingUpdate]) -> Result<(), DirectoryError> {
        self.directory.bulk_update(batch).await
    }
}

/// Counters describing what an aggregator did over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorStats {
    pub size_flushes: u64,
    pub timer_flushes: u64,
    /// Flushes issued on the way out, either because the queue closed or on shutdown.
    pub final_flushes: u64,
    pub failed_flushes: u64,
    /// Items in batches the flusher accepted.
    pub items_flushed: u64,
    /// Items in batches the flusher rejected. These are gone.
    pub items_failed: u64,
}

impl AggregatorStats {
    pub fn flushes(&self) -> u64 {
        self.size_flushes + self.timer_flushes + self.final_flushes
    }
}

/// Accumulates items from a queue and flushes them in batches.
///
/// A batch is flushed when it reaches `batch_size`, when `flush_timeout` elapses without a flush,
/// and once more when the input queue closes. On shutdown the timer stops, the queue is read until
/// every sender is dropped, and whatever is left goes out in one final flush. Flushes run inline on
/// the aggregator's own task, so batches never overlap and the batch needs no locking.
///
/// Delivery is at most once: a batch the flusher rejects is logged and discarded.
pub struct Aggregator<F: BatchFlusher> {
    flusher: F,
    batch_size: usize,
    flush_timeout: time::Duration,
    batch: Vec<F::Item>,
    stats: AggregatorStats,
}

impl<F: BatchFlusher> Aggregator<F> {
    pub fn new(flusher: F, config: &BatchingConfig) -> Self {
        Self::with_limits(flusher, config.batch_size, config.flush_timeout)
    }

    pub fn with_limits(flusher: F, batch_size: NonZeroUsize, flush_timeout: time::Duration) -> Self {
        Self {
            flusher,
            batch_size: batch_size.get(),
            // tokio intervals cannot have a zero period.
            flush_timeout: flush_timeout.max(time::Duration::from_millis(1)),
            batch: Vec::with_capacity(batch_size.get()),
            stats: AggregatorStats::default(),
        }
    }

    /// Consume `queue` until it is closed, returning what was flushed. Cancelling `shutdown` stops
    /// the timer but not the intake: the aggregator still waits for every sender to go away.
    pub async fn run(
        mut self,
        mut queue: mpsc::Receiver<F::Item>,
        shutdown: CancellationToken,
    ) -> AggregatorStats {
        let name = self.flusher.name();
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_timeout, self.flush_timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            aggregator = name,
            batch_size = self.batch_size,
            flush_timeout_secs = self.flush_timeout.as_secs_f64(),
            "aggregator started"
        );

        loop {
            tokio::select! {
                item = queue.recv() => match item {
                    Some(item) => {
                        if self.push(item).await {
                            // Restart the countdown so the timer doesn't fire right after a
                            // size flush.
                            ticker.reset();
                        }
                    }
                    None => {
                        self.flush(FlushTrigger::Closed).await;
                        info!(aggregator = name, "queue closed, aggregator done");
                        break;
                    }
                },
                _ = ticker.tick() => self.flush(FlushTrigger::Timer).await,
                _ = shutdown.cancelled() => {
                    // Senders may still be finishing in-flight work; read until all are dropped.
                    while let Some(item) = queue.recv().await {
                        self.push(item).await;
                    }
                    self.flush(FlushTrigger::Cancelled).await;
                    warn!(aggregator = name, "shutdown requested, aggregator done");
                    break;
                }
            }
        }

        self.stats
    }

    /// Append an item, flushing if that filled the batch. Returns whether a flush happened.
    async fn push(&mut self, item: F::Item) -> bool {
        self.batch.push(item);

        if self.batch.len() >= self.batch_size {
            self.flush(FlushTrigger::Size).await;
            true
        } else {
            false
        }
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        if self.batch.is_empty() {
            return;
        }

        let name = self.flusher.name();
        let size = self.batch.len();
        let labels = [("aggregator", name), ("trigger", trigger.as_str())];

        info!(aggregator = name, size, trigger = %trigger, "flushing batch");

        let start = Instant::now();
        let result = self.flusher.flush(&self.batch).await;

        metrics::counter!(BATCH_FLUSHES, &labels).increment(1);
        metrics::histogram!(BATCH_FLUSH_TIME, "aggregator" => name)
            .record(start.elapsed().as_secs_f64());
        metrics::histogram!(BATCH_SIZE, "aggregator" => name).record(size as f64);

        match trigger {
            FlushTrigger::Size => self.stats.size_flushes += 1,
            FlushTrigger::Timer => self.stats.timer_flushes += 1,
            FlushTrigger::Closed | FlushTrigger::Cancelled => self.stats.final_flushes += 1,
        }

        match result {
            Ok(()) => self.stats.items_flushed += size as u64,
            Err(error) => {
                error!(
                    aggregator = name,
                    size,
                    status = error.status().map(|status| status.as_u16()),
                    "batch flush failed, dropping batch: {}",
                    error
                );
                metrics::counter!(BATCH_FLUSH_FAILURES, "aggregator" => name).increment(1);
                self.stats.failed_flushes += 1;
                self.stats.items_failed += size as u64;
            }
        }

        self.batch.clear();
    }
}
