//! Error taxonomy for the ingestion pipeline (spec §7).
//!
//! Library code returns [`IngestError`] so callers can tell transient
//! failures (retry without advancing the cursor) from permanent ones
//! (log, drop the record or fail the batch, never retry blindly).
//! Top-level commands (`src/bin/*.rs`) collapse this into `anyhow::Error`
//! at the boundary, logging once before exiting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Timeouts, 5xx, connection resets, WebSocket close frames.
    /// Callers should retry with backoff and must not advance the cursor.
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// 4xx (other than 404), malformed script, schema violations.
    /// The batch fails; the cursor does not advance.
    #[error("permanent client error: {0}")]
    Permanent(String),

    /// 404 on update/delete: not an error, just "nothing to do there yet".
    #[error("not found: {0}")]
    NotFound(String),

    /// Per-record decode failure (bad JSON, missing required field).
    /// The record is dropped; the batch continues.
    #[error("decode error: {0}")]
    Decode(String),

    /// A record had an empty document key and was dropped.
    #[error("empty key for record: {0}")]
    EmptyKey(String),

    /// Authentication failure against the document store. Fatal.
    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("object storage error: {0}")]
    ObjectStore(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Whether retrying the same operation (unchanged inputs) is safe and
    /// might succeed, i.e. it did not permanently reject the batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Transient(_) | IngestError::Io(_))
    }

    /// Whether this is a benign "no-op" outcome that should be logged at
    /// debug rather than treated as a batch failure (§7 404 handling).
    pub fn is_benign(&self) -> bool {
        matches!(self, IngestError::NotFound(_))
    }
}
