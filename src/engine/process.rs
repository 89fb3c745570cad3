// ABOUTME: Executor that runs every operation attempt in a separate worker process
// ABOUTME: Sends a JSON request on the child's stdin and reads a JSON outcome line from its stdout

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::executor::{worker_request, TaskExecutor};
use crate::operations::{FailureKind, OperationFailure};
use crate::worker::WorkerOutcome;
use crate::workflows::OperationTask;

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessExecutor {
    /// Spawn `program worker` for each attempt
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["worker".to_string()],
        }
    }

    /// Use the running binary as the worker program
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

fn crashed(message: impl Into<String>) -> OperationFailure {
    OperationFailure::new(FailureKind::Crashed, message)
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    async fn execute(&self, task: &OperationTask, attempt: u32) -> Result<(), OperationFailure> {
        let request = worker_request(task, attempt);
        let payload = serde_json::to_vec(&request)
            .map_err(|e| OperationFailure::new(FailureKind::Serialization, e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                crashed(format!(
                    "failed to spawn worker {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        debug!(
            "Spawned worker {:?} for {} (attempt {})",
            child.id(),
            task.name,
            attempt
        );

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| crashed(format!("failed to send request to worker: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| crashed(format!("failed to close worker stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| crashed(format!("failed to wait for worker: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().rev().find(|line| !line.trim().is_empty()) else {
            warn!("Worker for {} exited with {} and no outcome", task.name, output.status);
            return Err(crashed(format!(
                "worker exited with {} without reporting an outcome",
                output.status
            )));
        };

        match serde_json::from_str::<WorkerOutcome>(line) {
            Ok(outcome) => outcome.into_result(),
            Err(e) => Err(crashed(format!(
                "unreadable worker outcome ({}): {}",
                e, line
            ))),
        }
    }
}
