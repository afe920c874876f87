//! Error types for the watch agent.

use thiserror::Error;

/// Errors raised by a seen-change ledger backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger file not found: {}", .0.display())]
    MissingStore(std::path::PathBuf),

    /// The partition for this endpoint was never ensured.
    #[error("no partition for endpoint {0}")]
    MissingPartition(String),
}

/// Errors raised while querying a review server.
#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("review server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised by the mail transport.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("mail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors found while validating configured sources.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("source #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("source #{index} repeats endpoint {endpoint}")]
    DuplicateEndpoint { index: usize, endpoint: String },

    #[error("no valid sources configured")]
    NoSources,
}
