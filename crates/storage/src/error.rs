//! Storage error types

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Durable store cannot take or serve records right now
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Ring buffers need room for at least one entry
    #[error("Invalid ring buffer capacity: {0}")]
    InvalidCapacity(usize),

    /// Payload could not be converted to or from its stored form
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
