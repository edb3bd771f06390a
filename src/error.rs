//! Error types for cacheprog
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CacheError
pub type Result<T> = std::result::Result<T, CacheError>;

/// Unified error type for cacheprog operations
#[derive(Debug, Error)]
pub enum CacheError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("walk cache directory: {0}")]
    Walk(#[from] walkdir::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors (fatal to the session)
    // -------------------------------------------------------------------------
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Protocol(String),

    #[error("worker thread panicked")]
    WorkerPanicked,

    // -------------------------------------------------------------------------
    // Request Errors (reported in a single response)
    // -------------------------------------------------------------------------
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("put: cache is read-only")]
    ReadOnly,

    #[error("{context}: {source}")]
    Request {
        context: String,
        #[source]
        source: Box<CacheError>,
    },

    /// Failure reported by a cache backend, shown verbatim
    #[error("{0}")]
    Backend(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("invalid id {0:?}: want lower-case hex of at least 2 digits")]
    InvalidId(String),

    #[error("invalid action file for {0}")]
    InvalidRecord(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Wrap an error with a request-level context prefix
    pub fn context(context: impl Into<String>, source: impl Into<CacheError>) -> Self {
        CacheError::Request {
            context: context.into(),
            source: Box::new(source.into()),
        }
    }

    /// Whether this error is an I/O not-found condition, looking through context
    pub fn is_not_found(&self) -> bool {
        match self {
            CacheError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            CacheError::Request { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
