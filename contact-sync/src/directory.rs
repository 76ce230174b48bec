//! Client for the remote contact directory.
use std::time;

use async_trait::async_trait;
use contact_common::contact::{Contact, PendingUpdate, RemoteId};
use contact_common::payload::{bulk_create_request, bulk_update_request, SearchRequest, SearchResponse};
use http::StatusCode;
use reqwest::header;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{DirectoryError, Operation};

/// Response bodies are only kept around for error messages, so we don't need much of them.
const MAX_ERROR_BODY: usize = 1024;

/// The remote directory as consumed by the pipeline.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Search for a contact by phone number, returning its remote id when it exists.
    async fn lookup(&self, phone: &str) -> Result<Option<RemoteId>, DirectoryError>;

    async fn bulk_create(&self, contacts: &[Contact]) -> Result<(), DirectoryError>;

    async fn bulk_update(&self, updates: &[PendingUpdate]) -> Result<(), DirectoryError>;
}

/// A `Directory` backed by the directory's JSON-over-HTTP API.
pub struct HttpDirectory {
    /// The client used for HTTP requests. Carries the api key and request timeout.
    client: reqwest::Client,
    search_url: Url,
    create_url: Url,
    update_url: Url,
}

impl HttpDirectory {
    pub fn new(
        base_url: &str,
        api_key: &str,
        request_timeout: time::Duration,
    ) -> Result<Self, DirectoryError> {
        let mut api_key = header::HeaderValue::from_str(api_key)
            .map_err(|error| DirectoryError::Client(format!("invalid api key: {error}")))?;
        api_key.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert("api-key", api_key);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Contact Sync")
            .timeout(request_timeout)
            .build()
            .map_err(|error| DirectoryError::Client(error.to_string()))?;

        Ok(Self {
            client,
            search_url: endpoint(base_url, "contact/search")?,
            create_url: endpoint(base_url, "contact/create")?,
            update_url: endpoint(base_url, "contact/update")?,
        })
    }

    /// POST a JSON body and hand back the response if it was successful.
    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        operation: Operation,
        url: &Url,
        body: &T,
    ) -> Result<reqwest::Response, DirectoryError> {
        let start = tokio::time::Instant::now();

        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|error| DirectoryError::Transport { operation, error })?;

        let status = response.status();
        debug!(
            operation = %operation,
            status = status.as_u16(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "directory responded"
        );

        if status == StatusCode::UNAUTHORIZED {
            return Err(DirectoryError::Unauthorized { operation });
        }

        let accepted = match operation {
            Operation::Search => status == StatusCode::OK,
            Operation::BulkCreate | Operation::BulkUpdate => status.as_u16() < 300,
        };

        if !accepted {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::UnexpectedStatus {
                operation,
                status,
                body: truncate_body(body),
            });
        }

        Ok(response)
    }

    async fn send_bulk<T: serde::Serialize>(
        &self,
        operation: Operation,
        url: &Url,
        payload: &T,
    ) -> Result<(), DirectoryError> {
        let response = self.post(operation, url, payload).await?;

        // The bulk endpoints answer with a summary we don't act on, so it's only worth a debug line.
        let body = response
            .text()
            .await
            .map_err(|error| DirectoryError::Transport { operation, error })?;
        debug!(operation = %operation, body = %truncate_body(body), "bulk request accepted");

        Ok(())
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn lookup(&self, phone: &str) -> Result<Option<RemoteId>, DirectoryError> {
        let operation = Operation::Search;
        let response = self
            .post(operation, &self.search_url, &SearchRequest::by_phone(phone))
            .await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|error| DirectoryError::Transport { operation, error })?;
        let result: SearchResponse = serde_json::from_slice(&bytes)
            .map_err(|error| DirectoryError::Decode { operation, error })?;

        Ok(result.into_remote_id())
    }

    async fn bulk_create(&self, contacts: &[Contact]) -> Result<(), DirectoryError> {
        let payload = bulk_create_request(contacts);
        self.send_bulk(Operation::BulkCreate, &self.create_url, &payload)
            .await
    }

    async fn bulk_update(&self, updates: &[PendingUpdate]) -> Result<(), DirectoryError> {
        let payload = bulk_update_request(updates);
        self.send_bulk(Operation::BulkUpdate, &self.update_url, &payload)
            .await
    }
}

fn endpoint(base_url: &str, path: &str) -> Result<Url, DirectoryError> {
    let raw = format!("{}/{}", base_url.trim_end_matches('/'), path);
    Url::parse(&raw)
        .map_err(|error| DirectoryError::Client(format!("invalid directory url {raw}: {error}")))
}

/// Keep at most `MAX_ERROR_BODY` bytes of a response body, cutting on a char boundary.
/// JSON bodies are compacted first so they fit on a single log line.
fn truncate_body(body: String) -> String {
    let mut body = match serde_json::from_str::<Value>(&body) {
        Ok(json) => json.to_string(),
        Err(_) => body,
    };

    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    body
}
