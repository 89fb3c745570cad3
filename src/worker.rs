// ABOUTME: Worker entry point: runs one operation attempt described by a request on stdin
// ABOUTME: The context is rebuilt from its descriptor and the outcome is written as one JSON line on stdout

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, instrument};

use crate::context::serialization::{self, ContextDescriptor};
use crate::model::{PluginSpec, Properties};
use crate::operations::{FailureKind, OperationFailure, OperationRegistry};

/// Everything a worker needs to run one attempt of an operation task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: String,
    pub task_name: String,
    pub attempt: u32,
    pub operation_mapping: String,
    #[serde(default)]
    pub inputs: Properties,
    #[serde(default)]
    pub plugin: Option<PluginSpec>,
    pub context: ContextDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Success,
    Failure { kind: FailureKind, message: String },
}

impl WorkerOutcome {
    pub fn into_result(self) -> Result<(), OperationFailure> {
        match self {
            WorkerOutcome::Success => Ok(()),
            WorkerOutcome::Failure { kind, message } => Err(OperationFailure::new(kind, message)),
        }
    }
}

impl From<Result<(), OperationFailure>> for WorkerOutcome {
    fn from(result: Result<(), OperationFailure>) -> Self {
        match result {
            Ok(()) => WorkerOutcome::Success,
            Err(failure) => WorkerOutcome::Failure {
                kind: failure.kind,
                message: failure.message,
            },
        }
    }
}

/// Rebuild the context, resolve the operation and run it once
#[instrument(skip_all, fields(task = %request.task_name, attempt = request.attempt))]
pub async fn execute_request(
    registry: &OperationRegistry,
    request: WorkerRequest,
) -> Result<(), OperationFailure> {
    let operation = registry.resolve(&request.operation_mapping)?;

    let ctx = serialization::deserialize(request.context)
        .await
        .map_err(|e| OperationFailure::new(FailureKind::Serialization, e.to_string()))?;

    if let Some(plugin) = &request.plugin {
        info!("Running {} from plugin {}", request.operation_mapping, plugin.name);
    }

    let result = operation.run(&ctx, &request.inputs).await;
    ctx.close().await;
    result.map_err(OperationFailure::from)
}

/// Read a request from stdin, run it, and print the outcome on stdout
pub async fn run(registry: &OperationRegistry) -> std::io::Result<()> {
    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;

    let outcome: WorkerOutcome = match serde_json::from_str::<WorkerRequest>(&raw) {
        Ok(request) => execute_request(registry, request).await.into(),
        Err(e) => {
            error!("Malformed worker request: {}", e);
            WorkerOutcome::Failure {
                kind: FailureKind::Serialization,
                message: format!("malformed worker request: {}", e),
            }
        }
    };

    let mut line = serde_json::to_string(&outcome)?;
    line.push('\n');

    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
