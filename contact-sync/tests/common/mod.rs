use std::io;
use std::num::NonZeroUsize;
use std::time;

use contact_common::contact::Contact;
use contact_sync::error::SourceError;
use contact_sync::pipeline::{BatchingConfig, PipelineConfig};
use contact_sync::source::RecordSource;

pub fn nonzero(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).expect("capacity must be non-zero")
}

/// A pipeline configuration with no lookup pacing and a flush timeout long enough never to fire.
pub fn test_config(workers: usize, batch_size: usize) -> PipelineConfig {
    let batching = BatchingConfig {
        batch_size: nonzero(batch_size),
        flush_timeout: time::Duration::from_secs(60),
        queue_capacity: nonzero(8),
    };

    PipelineConfig {
        classifier_workers: nonzero(workers),
        lookup_interval: time::Duration::ZERO,
        intake_capacity: nonzero(8),
        create_batching: batching.clone(),
        update_batching: batching,
    }
}

/// Yields its contacts, then sleeps for `linger` before reporting the end of input.
pub struct LingeringSource {
    pub contacts: std::vec::IntoIter<Contact>,
    pub linger: time::Duration,
}

impl RecordSource for LingeringSource {
    fn next_contact(&mut self) -> Result<Option<Contact>, SourceError> {
        match self.contacts.next() {
            Some(contact) => Ok(Some(contact)),
            None => {
                std::thread::sleep(self.linger);
                Ok(None)
            }
        }
    }
}

/// Yields its contacts, then fails as if the underlying file had gone away.
pub struct FailingSource {
    pub contacts: std::vec::IntoIter<Contact>,
}

impl RecordSource for FailingSource {
    fn next_contact(&mut self) -> Result<Option<Contact>, SourceError> {
        match self.contacts.next() {
            Some(contact) => Ok(Some(contact)),
            None => Err(SourceError::Read {
                row: 42,
                error: csv::Error::from(io::Error::new(io::ErrorKind::Other, "disk gone")),
            }),
        }
    }
}

/// Never runs out of contacts.
pub struct EndlessSource {
    pub next: u32,
}

impl RecordSource for EndlessSource {
    fn next_contact(&mut self) -> Result<Option<Contact>, SourceError> {
        self.next += 1;
        Ok(Some(Contact::new(&format!("+1777{:06}", self.next))))
    }
}
