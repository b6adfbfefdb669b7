//! Crate-wide error type
//!
//! Most failures in the supervisor are local: registry write errors are
//! logged and swallowed, subprocess failures feed the restart policy.
//! `IngestError` covers the paths that do propagate, chiefly startup and
//! registry/feed I/O.

use thiserror::Error;

/// Error type for ingest supervisor operations
#[derive(Debug, Error)]
pub enum IngestError {
    /// Registry HTTP request failed
    #[error("registry request failed: {0}")]
    Registry(#[from] reqwest::Error),

    /// Registry returned a payload we could not decode
    #[error("registry payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Change feed websocket failure
    #[error("change feed: {0}")]
    ChangeFeed(#[from] tokio_tungstenite::tungstenite::Error),

    /// Source origin address is malformed or uses the wrong scheme
    #[error("invalid origin address: {0}")]
    Origin(String),

    /// I/O failure (port bind, media directory)
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, IngestError>;
