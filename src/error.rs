use thiserror::Error;

/// Reading the result collection from a source failed.
///
/// Never fatal: the store reports it through the error callback and keeps
/// serving the last list it fetched successfully.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("source responded with HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected response shape: {0}")]
    Schema(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A single record that could not be turned into a `ResultItem`.
/// The record is dropped; the rest of its batch survives.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed record #{index}: {reason}")]
pub struct MalformedRecord {
    pub index: usize,
    pub reason: String,
}
