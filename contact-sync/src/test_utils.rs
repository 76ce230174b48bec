//! In-memory directory used by unit and integration tests.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time;

use async_trait::async_trait;
use contact_common::contact::{Contact, PendingUpdate, RemoteId};
use http::StatusCode;

use crate::directory::Directory;
use crate::error::{DirectoryError, Operation};

/// A `Directory` that knows a fixed set of phone numbers and records every bulk call it receives.
#[derive(Default)]
pub struct FakeDirectory {
    existing: HashMap<String, RemoteId>,
    failing_lookups: HashSet<String>,
    fail_bulk: bool,
    lookup_delay: time::Duration,
    flush_delay: time::Duration,
    lookups: AtomicUsize,
    lookups_in_flight: AtomicUsize,
    max_lookups_in_flight: AtomicUsize,
    created: Mutex<Vec<Vec<Contact>>>,
    updated: Mutex<Vec<Vec<PendingUpdate>>>,
}

impl FakeDirectory {
    pub fn with_existing(mut self, phone: &str, remote_id: i64) -> Self {
        self.existing
            .insert(phone.to_owned(), RemoteId::from(remote_id));
        self
    }

    pub fn with_failing_lookup(mut self, phone: &str) -> Self {
        self.failing_lookups.insert(phone.to_owned());
        self
    }

    pub fn with_lookup_delay(mut self, delay: time::Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    pub fn with_flush_delay(mut self, delay: time::Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    pub fn with_failing_bulk_calls(mut self) -> Self {
        self.fail_bulk = true;
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Highest number of lookups observed running at the same time.
    pub fn max_concurrent_lookups(&self) -> usize {
        self.max_lookups_in_flight.load(Ordering::SeqCst)
    }

    pub fn create_batches(&self) -> Vec<Vec<Contact>> {
        self.created.lock().unwrap().clone()
    }

    pub fn update_batches(&self) -> Vec<Vec<PendingUpdate>> {
        self.updated.lock().unwrap().clone()
    }

    pub fn created_phones(&self) -> Vec<String> {
        self.create_batches()
            .into_iter()
            .flatten()
            .map(|contact| contact.phone)
            .collect()
    }

    fn bulk_result(&self, operation: Operation) -> Result<(), DirectoryError> {
        if self.fail_bulk {
            Err(DirectoryError::UnexpectedStatus {
                operation,
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "directory unavailable".to_owned(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn lookup(&self, phone: &str) -> Result<Option<RemoteId>, DirectoryError> {
        let in_flight = self.lookups_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_lookups_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }

        self.lookups_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_lookups.contains(phone) {
            return Err(DirectoryError::UnexpectedStatus {
                operation: Operation::Search,
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "search unavailable".to_owned(),
            });
        }

        Ok(self.existing.get(phone).cloned())
    }

    async fn bulk_create(&self, contacts: &[Contact]) -> Result<(), DirectoryError> {
        if !self.flush_delay.is_zero() {
            tokio::time::sleep(self.flush_delay).await;
        }
        self.created.lock().unwrap().push(contacts.to_vec());
        self.bulk_result(Operation::BulkCreate)
    }

    async fn bulk_update(&self, updates: &[PendingUpdate]) -> Result<(), DirectoryError> {
        if !self.flush_delay.is_zero() {
            tokio::time::sleep(self.flush_delay).await;
        }
        self.updated.lock().unwrap().push(updates.to_vec());
        self.bulk_result(Operation::BulkUpdate)
    }
}

/// `count` distinct contacts, numbered from `first`.
pub fn contacts(first: u32, count: u32) -> Vec<Contact> {
    (first..first + count)
        .map(|n| Contact::new(&format!("+1555{n:06}")).with_name(&format!("Contact {n}"), ""))
        .collect()
}
