//! Error types for docent-core

use thiserror::Error;

/// Main error type for the docent-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/transport error (connection refused, timeout, bad response)
    #[error("network error: {0}")]
    Network(String),

    /// Local persistence unavailable (quota, poisoned handle, injected fault)
    #[error("storage error: {0}")]
    Storage(String),

    /// Static asset neither cached nor reachable
    #[error("asset unavailable: {path} ({reason})")]
    AssetUnavailable { path: String, reason: String },

    /// A result view is already being timed
    #[error("already tracking a view of artwork {0}")]
    AlreadyTracking(String),
}

/// Result type alias for docent-core
pub type Result<T> = std::result::Result<T, Error>;
