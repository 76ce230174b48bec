use std::fmt;
use std::path::PathBuf;

use http::StatusCode;
use thiserror::Error;

/// The directory endpoints we talk to. Used to label errors, logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    BulkCreate,
    BulkUpdate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::BulkCreate => "bulk_create",
            Operation::BulkUpdate => "bulk_update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Enumeration of errors returned by calls to the remote directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("failed to build directory client: {0}")]
    Client(String),
    #[error("{operation} request could not be completed: {error}")]
    Transport {
        operation: Operation,
        error: reqwest::Error,
    },
    #[error("{operation} was rejected as unauthorized, check the api key")]
    Unauthorized { operation: Operation },
    #[error("{operation} failed with status {status}: {body}")]
    UnexpectedStatus {
        operation: Operation,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode {operation} response: {error}")]
    Decode {
        operation: Operation,
        error: serde_json::Error,
    },
}

impl DirectoryError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DirectoryError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            DirectoryError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Enumeration of errors raised while reading contacts. Any of these aborts the run.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open contact source {path}: {error}")]
    Open { path: PathBuf, error: csv::Error },
    #[error("failed to read contact source header: {0}")]
    Header(csv::Error),
    #[error("failed to read contact source at row {row}: {error}")]
    Read { row: u64, error: csv::Error },
}

/// Enumeration of errors that terminate a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("contact source failed")]
    Source(#[from] SourceError),
    #[error("a pipeline task failed to complete")]
    Task(#[from] tokio::task::JoinError),
}
