// ABOUTME: Main library module for the conductor task-graph execution core
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod context;
pub mod engine;
pub mod model;
pub mod operations;
pub mod storage;
pub mod worker;
pub mod workflows;

// Re-export commonly used types
pub use context::{OperationContext, WorkflowContext, WorkflowContextOptions};
pub use engine::{EngineError, InProcessExecutor, ProcessExecutor, SignalBus, WorkflowEngine};
pub use operations::{Operation, OperationRegistry};
pub use storage::{ModelStorage, ResourceStorage, StorageError};
pub use workflows::{GraphApi, OperationTask, StubTask, Task, TaskGraph, WorkflowTask};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
