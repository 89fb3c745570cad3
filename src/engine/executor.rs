// ABOUTME: Executor abstraction that runs one attempt of an operation task
// ABOUTME: The in-process executor crosses the same context-descriptor boundary as worker processes

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::error;

use crate::context::serialization;
use crate::operations::{FailureKind, OperationError, OperationFailure, OperationRegistry};
use crate::worker::{self, WorkerRequest};
use crate::workflows::OperationTask;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run attempt number `attempt` (1-based) of `task`
    async fn execute(&self, task: &OperationTask, attempt: u32) -> Result<(), OperationFailure>;
}

/// Request describing one attempt; the context travels as a descriptor only
pub fn worker_request(task: &OperationTask, attempt: u32) -> WorkerRequest {
    let ctx = task.context.operation_context(task);
    WorkerRequest {
        task_id: task.id.clone(),
        task_name: task.name.clone(),
        attempt,
        operation_mapping: task.operation_mapping.clone(),
        inputs: task.inputs.clone(),
        plugin: task.plugin.clone(),
        context: serialization::serialize(&ctx),
    }
}

/// Runs operations on tokio tasks inside the current process
///
/// Each attempt rebuilds its context from a descriptor, so operations see their
/// own storage handles exactly as they would in a worker process.
#[derive(Debug, Clone)]
pub struct InProcessExecutor {
    registry: Arc<OperationRegistry>,
}

impl InProcessExecutor {
    pub fn new(registry: OperationRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }
}

/// Aborts the spawned operation when the dispatching future is dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl TaskExecutor for InProcessExecutor {
    async fn execute(&self, task: &OperationTask, attempt: u32) -> Result<(), OperationFailure> {
        if !self.registry.contains(&task.operation_mapping) {
            return Err(OperationError::UnknownMapping(task.operation_mapping.clone()).into());
        }

        let request = worker_request(task, attempt);
        let registry = Arc::clone(&self.registry);

        let mut handle = AbortOnDrop(tokio::spawn(async move {
            worker::execute_request(&registry, request).await
        }));

        match (&mut handle.0).await {
            Ok(result) => result,
            Err(join_error) => {
                error!("Operation task {} crashed: {}", task.name, join_error);
                Err(OperationFailure::new(
                    FailureKind::Crashed,
                    format!("operation crashed: {}", join_error),
                ))
            }
        }
    }
}
