// ABOUTME: Task abstraction, task graphs and builtin workflows
// ABOUTME: Workflows are plain functions that fill a TaskGraph from an explicit WorkflowContext

pub mod builtin;
pub mod error;
pub mod graph;
pub mod task;

pub use error::{Result, TaskCreationError, TaskGraphError, WorkflowError};
pub use graph::{GraphApi, TaskGraph};
pub use task::{
    Actor, MaxAttempts, OperationEnd, OperationTask, StubTask, Task, TaskId, WorkflowTask,
};
