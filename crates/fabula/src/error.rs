//! Error types for Fabula

use thiserror::Error;

/// Main error type for Fabula operations
#[derive(Error, Debug)]
pub enum FabulaError {
    /// Storage-related errors (blob backend, file system, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Consolidation queue is at capacity; the caller must retry later
    #[error("Consolidation queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// A consolidation operation failed after exhausting its retries
    #[error("Consolidation failed: {0}")]
    Consolidation(String),

    /// The guard is shutting down and no longer accepts work
    #[error("Shutting down")]
    ShuttingDown,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for FabulaError {
    fn from(e: serde_json::Error) -> Self {
        FabulaError::Serialization(e.to_string())
    }
}

/// Result type alias for Fabula operations
pub type Result<T> = std::result::Result<T, FabulaError>;
