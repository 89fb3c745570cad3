// ABOUTME: Error types surfaced by the workflow engine to its caller
// ABOUTME: An exhausted, non-ignored task failure is reported as EngineError::Executor

use thiserror::Error;

use crate::context::ContextError;
use crate::operations::OperationFailure;
use crate::storage::StorageError;
use crate::workflows::{TaskGraphError, WorkflowError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Task '{task}' failed after {attempts} attempt(s): {source}")]
    Executor {
        task: String,
        task_id: String,
        attempts: u32,
        #[source]
        source: OperationFailure,
    },

    #[error("Task graph error: {0}")]
    Graph(#[from] TaskGraphError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Workflow stalled with {pending} task(s) unable to start")]
    Stalled { pending: usize },
}

impl EngineError {
    /// The failure of the task that aborted the workflow, if that is what happened
    pub fn task_failure(&self) -> Option<&OperationFailure> {
        match self {
            EngineError::Executor { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
