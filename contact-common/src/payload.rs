//! Wire types for the remote directory's JSON API.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, PendingUpdate, RemoteId};

/// Fields we ask the search endpoint to return.
const SEARCH_FIELDS: [&str; 3] = ["mobile", "email", "contact_id"];

/// Contacts are always upserted as identified (as opposed to anonymous) contacts.
const CONTACT_TYPE: &str = "identified";

#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub output: SearchOutput,
    pub filtering_criteria: Vec<FilteringCriteria<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub get_count: bool,
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct FilteringCriteria<'a> {
    pub condition_details: Vec<Condition<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Condition<'a> {
    pub field: &'static str,
    pub field_category: &'static str,
    pub operation: &'static str,
    pub value: Vec<&'a str>,
}

impl<'a> SearchRequest<'a> {
    /// Build a search matching exactly one mobile number.
    pub fn by_phone(phone: &'a str) -> Self {
        Self {
            output: SearchOutput {
                get_count: false,
                fields: SEARCH_FIELDS.to_vec(),
            },
            filtering_criteria: vec![FilteringCriteria {
                condition_details: vec![Condition {
                    field: "MOBILE",
                    field_category: "config",
                    operation: "equals",
                    value: vec![phone],
                }],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<SearchMatch>,
}

#[derive(Debug, Deserialize)]
pub struct SearchMatch {
    pub contact_id: RemoteId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
}

impl SearchResponse {
    /// The directory guarantees phone numbers are unique, so only the first match matters.
    pub fn into_remote_id(self) -> Option<RemoteId> {
        self.data.into_iter().next().map(|found| found.contact_id)
    }
}

/// Envelope shared by the bulk create and bulk update endpoints.
#[derive(Debug, Serialize)]
pub struct BulkRequest<T> {
    pub data: BulkData<T>,
}

#[derive(Debug, Serialize)]
pub struct BulkData<T> {
    pub contact_type: &'static str,
    pub contacts: Vec<T>,
}

impl<T> BulkRequest<T> {
    fn new(contacts: Vec<T>) -> Self {
        Self {
            data: BulkData {
                contact_type: CONTACT_TYPE,
                contacts,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.data.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.contacts.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct CreateEntry<'a> {
    pub mobile: &'a str,
    pub identity: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Serialize)]
pub struct UpdateEntry<'a> {
    pub contact_id: &'a RemoteId,
    pub mobile: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<&'static str, &'a str>,
}

impl<'a> From<&'a Contact> for CreateEntry<'a> {
    fn from(contact: &'a Contact) -> Self {
        Self {
            mobile: &contact.phone,
            identity: &contact.phone,
            attributes: contact.attributes(),
        }
    }
}

impl<'a> From<&'a PendingUpdate> for UpdateEntry<'a> {
    fn from(update: &'a PendingUpdate) -> Self {
        Self {
            contact_id: &update.remote_id,
            mobile: &update.contact.phone,
            attributes: update.contact.attributes(),
        }
    }
}

pub fn bulk_create_request(contacts: &[Contact]) -> BulkRequest<CreateEntry<'_>> {
    BulkRequest::new(contacts.iter().map(CreateEntry::from).collect())
}

pub fn bulk_update_request(updates: &[PendingUpdate]) -> BulkRequest<UpdateEntry<'_>> {
    BulkRequest::new(updates.iter().map(UpdateEntry::from).collect())
}
