use std::num::NonZeroUsize;
use std::ops::AddAssign;
use std::sync::Arc;

use contact_common::contact::{Contact, PendingUpdate};
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::lookup::SerializedLookup;
use crate::metrics_consts::{CONTACTS_DROPPED, CONTACTS_ROUTED, LOOKUP_ERRORS};

/// Where a classified contact was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Create,
    Update,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Create => "create",
            Route::Update => "update",
        }
    }
}

/// Per-route counts of the contacts a classifier handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierStats {
    pub created: u64,
    pub updated: u64,
    pub dropped: u64,
}

impl ClassifierStats {
    /// Every contact taken off the intake queue ends up in exactly one of the three counts.
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.dropped
    }

    fn record_routed(&mut self, route: Route) {
        match route {
            Route::Create => self.created += 1,
            Route::Update => self.updated += 1,
        }
        metrics::counter!(CONTACTS_ROUTED, "route" => route.as_str()).increment(1);
    }

    fn record_dropped(&mut self, reason: &'static str) {
        self.dropped += 1;
        metrics::counter!(CONTACTS_DROPPED, "reason" => reason).increment(1);
    }
}

impl AddAssign for ClassifierStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.dropped += other.dropped;
    }
}

/// A fixed-size pool of workers that look contacts up and route them to the create or update queue.
pub struct ClassifierPool<D> {
    lookup: Arc<SerializedLookup<D>>,
    workers: NonZeroUsize,
}

impl<D: Directory> ClassifierPool<D> {
    pub fn new(lookup: Arc<SerializedLookup<D>>, workers: NonZeroUsize) -> Self {
        Self { lookup, workers }
    }

    /// Spawn the workers. They take ownership of the only senders for the create and update
    /// queues, so those queues close once the last worker exits.
    pub fn start(
        self,
        intake: mpsc::Receiver<Contact>,
        create_queue: mpsc::Sender<Contact>,
        update_queue: mpsc::Sender<PendingUpdate>,
        shutdown: CancellationToken,
    ) -> ClassifierHandle {
        let intake = Arc::new(Mutex::new(intake));

        let workers = (0..self.workers.get())
            .map(|id| {
                let worker = ClassifierWorker {
                    id,
                    lookup: self.lookup.clone(),
                    intake: intake.clone(),
                    create_queue: create_queue.clone(),
                    update_queue: update_queue.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = self.workers.get(), "classifier pool started");

        ClassifierHandle { workers }
    }
}

/// Handle to a running `ClassifierPool`.
pub struct ClassifierHandle {
    workers: Vec<JoinHandle<ClassifierStats>>,
}

impl ClassifierHandle {
    /// Wait for every worker to exit, which happens once intake is closed and drained, or on
    /// shutdown. When this returns the create and update queues have no senders left.
    pub async fn wait(self) -> Result<ClassifierStats, JoinError> {
        let mut total = ClassifierStats::default();

        for result in join_all(self.workers).await {
            total += result?;
        }

        info!(
            created = total.created,
            updated = total.updated,
            dropped = total.dropped,
            "all lookups done"
        );

        Ok(total)
    }
}

struct ClassifierWorker<D> {
    id: usize,
    lookup: Arc<SerializedLookup<D>>,
    intake: Arc<Mutex<mpsc::Receiver<Contact>>>,
    create_queue: mpsc::Sender<Contact>,
    update_queue: mpsc::Sender<PendingUpdate>,
    shutdown: CancellationToken,
}

impl<D: Directory> ClassifierWorker<D> {
    async fn run(self) -> ClassifierStats {
        debug!(worker = self.id, "classifier worker started");
        let mut stats = ClassifierStats::default();

        while let Some(contact) = self.next_contact().await {
            self.classify(contact, &mut stats).await;
        }

        debug!(worker = self.id, "classifier worker finished");
        stats
    }

    /// Take the next contact off intake. Returns `None` once intake is closed and empty, or as
    /// soon as shutdown is requested.
    async fn next_contact(&self) -> Option<Contact> {
        let mut intake = self.intake.lock().await;

        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => None,
            contact = intake.recv() => contact,
        }
    }

    async fn classify(&self, contact: Contact, stats: &mut ClassifierStats) {
        let phone = contact.phone.clone();
        debug!(worker = self.id, phone = %phone, "searching contact");

        match self.lookup.lookup(&contact.phone).await {
            Err(error) => {
                metrics::counter!(LOOKUP_ERRORS, "status" => status_label(&error)).increment(1);
                match error {
                    DirectoryError::Unauthorized { .. } => error!(
                        worker = self.id,
                        phone = %phone,
                        "lookup unauthorized, check the api key; dropping contact"
                    ),
                    error => error!(
                        worker = self.id,
                        phone = %phone,
                        "lookup failed, dropping contact: {}",
                        error
                    ),
                }
                stats.record_dropped("lookup");
            }
            Ok(Some(remote_id)) => {
                info!(worker = self.id, phone = %phone, remote_id = %remote_id, "contact found, updating");
                let update = PendingUpdate { remote_id, contact };
                if self.update_queue.send(update).await.is_err() {
                    warn!(worker = self.id, phone = %phone, "update queue closed, dropping contact");
                    stats.record_dropped("queue_closed");
                } else {
                    stats.record_routed(Route::Update);
                }
            }
            Ok(None) => {
                info!(worker = self.id, phone = %phone, "contact not found, creating");
                if self.create_queue.send(contact).await.is_err() {
                    warn!(worker = self.id, phone = %phone, "create queue closed, dropping contact");
                    stats.record_dropped("queue_closed");
                } else {
                    stats.record_routed(Route::Create);
                }
            }
        }
    }
}

fn status_label(error: &DirectoryError) -> &'static str {
    match error {
        DirectoryError::Unauthorized { .. } => "unauthorized",
        DirectoryError::UnexpectedStatus { .. } => "unexpected_status",
        DirectoryError::Decode { .. } => "decode",
        DirectoryError::Transport { .. } | DirectoryError::Client(_) => "transport",
    }
}
