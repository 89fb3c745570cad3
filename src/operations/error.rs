// ABOUTME: Error types raised by operations and the failure outcome reported for an attempt
// ABOUTME: Failures carry a kind so version conflicts stay distinguishable across processes

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::context::ContextError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Missing required input '{0}'")]
    MissingInput(String),

    #[error("Invalid input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("No operation registered for mapping '{0}'")]
    UnknownMapping(String),

    #[error("{0}")]
    Failed(String),
}

impl OperationError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            OperationError::Storage(e) if e.is_version_conflict() => FailureKind::VersionConflict,
            OperationError::Context(ContextError::Storage(e)) if e.is_version_conflict() => {
                FailureKind::VersionConflict
            }
            OperationError::UnknownMapping(_) => FailureKind::UnknownMapping,
            _ => FailureKind::Operation,
        }
    }

    pub fn into_failure(self) -> OperationFailure {
        OperationFailure::new(self.failure_kind(), self.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Operation,
    VersionConflict,
    UnknownMapping,
    Serialization,
    Crashed,
    Timeout,
}

impl FailureKind {
    /// Failures no further attempt can fix: a context that cannot cross the
    /// process boundary, or a mapping with no registered operation
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Serialization | FailureKind::UnknownMapping)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Operation => write!(f, "operation"),
            FailureKind::VersionConflict => write!(f, "version_conflict"),
            FailureKind::UnknownMapping => write!(f, "unknown_mapping"),
            FailureKind::Serialization => write!(f, "serialization"),
            FailureKind::Crashed => write!(f, "crashed"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of one failed attempt, as seen by the engine
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl OperationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        self.kind == FailureKind::VersionConflict
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl From<OperationError> for OperationFailure {
    fn from(error: OperationError) -> Self {
        error.into_failure()
    }
}
