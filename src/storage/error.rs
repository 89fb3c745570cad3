// ABOUTME: Error types for model and resource storage operations
// ABOUTME: Includes the version conflict raised by optimistic-concurrency writes

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unknown storage api: {0}")]
    UnknownApi(String),

    #[error("Invalid connection parameters for {api} storage: {reason}")]
    InvalidConnection { api: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Version conflict: {entity} {id} was read at version {expected} but is now at version {actual}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Corrupt {entity} record {id}: {reason}")]
    CorruptRecord {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Invalid resource path: {0}")]
    InvalidPath(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StorageError::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
