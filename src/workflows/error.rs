// ABOUTME: Error taxonomy for task construction and task graph assembly
// ABOUTME: All of these are raised while a workflow is being built and are never retried

use thiserror::Error;

use crate::context::ContextError;
use crate::model::ParameterError;

#[derive(Error, Debug)]
pub enum TaskCreationError {
    #[error("Invalid operation end '{end}'. Expected 'source_operations' or 'target_operations'")]
    InvalidOperationEnd { end: String },

    #[error("Operation '{operation}' has no operation mapping")]
    MissingMapping { operation: String },

    #[error("Invalid operation mapping '{mapping}'. Expected 'module.function'")]
    InvalidMapping { mapping: String },

    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("Invalid input '{name}': {source}")]
    InvalidInput {
        name: String,
        #[source]
        source: ParameterError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskGraphError {
    #[error("Adding a dependency of '{task}' on '{after}' would create a cycle")]
    CycleDetected { task: String, after: String },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("A task named '{0}' is already in the graph")]
    DuplicateTaskName(String),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Operation '{operation}' is not defined for {actor}")]
    OperationNotFound { operation: String, actor: String },

    #[error("Task creation error: {0}")]
    TaskCreation(#[from] TaskCreationError),

    #[error("Task graph error: {0}")]
    Graph(#[from] TaskGraphError),

    #[error("Unknown node for instance {0}")]
    UnknownNode(String),

    #[error("Unknown relationship for instance {0}")]
    UnknownRelationship(String),

    #[error("Unknown node instance: {0}")]
    UnknownInstance(String),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
