// ABOUTME: Error types for workflow and operation contexts
// ABOUTME: Covers missing storage handles, unknown deployments and serialization failures

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Context has no model storage")]
    MissingModelStorage,

    #[error("Context has no resource storage")]
    MissingResourceStorage,

    #[error("{context} context cannot access a {requested}")]
    WrongActorKind {
        context: &'static str,
        requested: &'static str,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failures crossing the process boundary
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Unknown storage api: {0}")]
    UnknownApi(String),

    #[error("Failed to reopen storage: {0}")]
    Storage(#[source] StorageError),

    #[error("Failed to decode context descriptor: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<StorageError> for SerializationError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::UnknownApi(api) => SerializationError::UnknownApi(api),
            other => SerializationError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
