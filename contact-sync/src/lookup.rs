use std::sync::Arc;
use std::time;

use contact_common::contact::RemoteId;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::metrics_consts::{LOOKUP_TIME, LOOKUP_WAIT_TIME};

/// Serializes directory lookups process-wide.
///
/// The search endpoint enforces a request cadence, so every classifier worker goes through this
/// gate: at most one lookup is in flight at any time, and consecutive lookups start at least
/// `min_interval` apart. Only the lookup itself is guarded; routing the result happens outside.
pub struct SerializedLookup<D> {
    directory: Arc<D>,
    min_interval: time::Duration,
    /// Held for the whole lookup. Remembers when the previous lookup started.
    last_started: Mutex<Option<Instant>>,
}

impl<D: Directory> SerializedLookup<D> {
    pub fn new(directory: Arc<D>, min_interval: time::Duration) -> Self {
        Self {
            directory,
            min_interval,
            last_started: Mutex::new(None),
        }
    }

    pub async fn lookup(&self, phone: &str) -> Result<Option<RemoteId>, DirectoryError> {
        let queued_at = Instant::now();
        let mut last_started = self.last_started.lock().await;

        if let Some(previous) = *last_started {
            tokio::time::sleep_until(previous + self.min_interval).await;
        }
        metrics::histogram!(LOOKUP_WAIT_TIME).record(queued_at.elapsed().as_secs_f64());

        let started = Instant::now();
        *last_started = Some(started);

        let result = self.directory.lookup(phone).await;
        metrics::histogram!(LOOKUP_TIME).record(started.elapsed().as_secs_f64());

        result
    }
}
