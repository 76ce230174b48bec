use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time;

use contact_common::contact::Contact;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregator, AggregatorStats, CreateFlusher, UpdateFlusher};
use crate::classifier::{ClassifierPool, ClassifierStats};
use crate::directory::Directory;
use crate::error::{PipelineError, SourceError};
use crate::lookup::SerializedLookup;
use crate::metrics_consts::CONTACTS_READ;
use crate::source::RecordSource;

/// Flush policy and queue size for one aggregator.
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    pub batch_size: NonZeroUsize,
    pub flush_timeout: time::Duration,
    pub queue_capacity: NonZeroUsize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN),
            flush_timeout: time::Duration::from_secs(60),
            queue_capacity: NonZeroUsize::new(500).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub classifier_workers: NonZeroUsize,
    /// Minimum spacing between the start of two directory lookups.
    pub lookup_interval: time::Duration,
    pub intake_capacity: NonZeroUsize,
    pub create_batching: BatchingConfig,
    pub update_batching: BatchingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier_workers: std::thread::available_parallelism()
                .unwrap_or(NonZeroUsize::MIN),
            lookup_interval: time::Duration::from_secs(1),
            intake_capacity: NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN),
            create_batching: BatchingConfig::default(),
            update_batching: BatchingConfig::default(),
        }
    }
}

/// What a completed run did with the contacts it read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Contacts accepted into the intake queue.
    pub read: u64,
    pub classified: ClassifierStats,
    pub create: AggregatorStats,
    pub update: AggregatorStats,
}

impl PipelineSummary {
    /// Contacts that were read but never classified because the run was cancelled.
    pub fn abandoned(&self) -> u64 {
        self.read.saturating_sub(self.classified.total())
    }

    fn log(&self) {
        info!(
            read = self.read,
            created = self.classified.created,
            updated = self.classified.updated,
            dropped = self.classified.dropped,
            abandoned = self.abandoned(),
            create_flushes = self.create.flushes(),
            create_items_failed = self.create.items_failed,
            update_flushes = self.update.flushes(),
            update_items_failed = self.update.items_failed,
            "all contacts processed"
        );
    }
}

/// Wires a record source, the classifier pool and both aggregators together and runs them to
/// completion.
pub struct Pipeline<D> {
    config: PipelineConfig,
    directory: Arc<D>,
}

impl<D: Directory> Pipeline<D> {
    pub fn new(config: PipelineConfig, directory: Arc<D>) -> Self {
        Self { config, directory }
    }

    /// Run the pipeline until `source` is exhausted and every accepted contact has been flushed.
    ///
    /// Stages shut down in order: the source closes intake, the classifier workers drain it and
    /// exit, which closes the create and update queues, and each aggregator then flushes what it
    /// holds and exits. Cancelling `shutdown` cuts this short: unclassified contacts are
    /// abandoned, but both aggregators still flush everything already queued for them.
    ///
    /// A failing source cancels the run the same way and is reported once everything has wound
    /// down.
    pub async fn run<S: RecordSource>(
        &self,
        source: S,
        shutdown: CancellationToken,
    ) -> Result<PipelineSummary, PipelineError> {
        let shutdown = shutdown.child_token();

        let (intake_tx, intake_rx) = mpsc::channel(self.config.intake_capacity.get());
        let (create_tx, create_rx) =
            mpsc::channel(self.config.create_batching.queue_capacity.get());
        let (update_tx, update_rx) =
            mpsc::channel(self.config.update_batching.queue_capacity.get());

        let create_aggregator = tokio::spawn(
            Aggregator::new(
                CreateFlusher::new(self.directory.clone()),
                &self.config.create_batching,
            )
            .run(create_rx, shutdown.clone()),
        );
        let update_aggregator = tokio::spawn(
            Aggregator::new(
                UpdateFlusher::new(self.directory.clone()),
                &self.config.update_batching,
            )
            .run(update_rx, shutdown.clone()),
        );

        let lookup = Arc::new(SerializedLookup::new(
            self.directory.clone(),
            self.config.lookup_interval,
        ));
        // The pool takes the only create and update senders with it.
        let classifiers = ClassifierPool::new(lookup, self.config.classifier_workers).start(
            intake_rx,
            create_tx,
            update_tx,
            shutdown.clone(),
        );

        let producer_shutdown = shutdown.clone();
        let producer =
            tokio::task::spawn_blocking(move || produce(source, intake_tx, producer_shutdown));

        // The producer drops the intake sender when it returns, closing intake.
        let produced = producer.await;
        match &produced {
            Ok(Produced { error: None, .. }) => {}
            Ok(Produced {
                error: Some(error), ..
            }) => {
                error!("aborting run, contact source failed: {}", error);
                shutdown.cancel();
            }
            Err(error) => {
                error!("aborting run, contact source panicked: {}", error);
                shutdown.cancel();
            }
        }

        // Nothing downstream may finish before every classifier is gone.
        let classified = classifiers.wait().await;

        let create = create_aggregator.await;
        let update = update_aggregator.await;

        let produced = produced?;
        let summary = PipelineSummary {
            read: produced.read,
            classified: classified?,
            create: create?,
            update: update?,
        };
        summary.log();

        match produced.error {
            Some(error) => Err(error.into()),
            None => Ok(summary),
        }
    }
}

struct Produced {
    read: u64,
    error: Option<SourceError>,
}

/// Feed contacts from `source` into intake until the source runs dry, fails, or the run is
/// cancelled. Runs on the blocking pool.
fn produce<S: RecordSource>(
    mut source: S,
    intake: mpsc::Sender<Contact>,
    shutdown: CancellationToken,
) -> Produced {
    let mut read = 0;

    loop {
        if shutdown.is_cancelled() {
            warn!(read, "shutdown requested, no longer reading contacts");
            return Produced { read, error: None };
        }

        match source.next_contact() {
            Ok(Some(contact)) => {
                debug!(phone = %contact.phone, "queuing contact");
                if intake.blocking_send(contact).is_err() {
                    warn!(read, "intake closed, no longer reading contacts");
                    return Produced { read, error: None };
                }
                read += 1;
                metrics::counter!(CONTACTS_READ).increment(1);
            }
            Ok(None) => {
                info!(read, "finished reading contacts");
                return Produced { read, error: None };
            }
            Err(error) => {
                return Produced {
                    read,
                    error: Some(error),
                }
            }
        }
    }
}
