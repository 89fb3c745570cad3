// ABOUTME: Retry policy driver for a single operation task
// ABOUTME: Dispatches attempts through the executor with optional timeout and concurrency limits, emitting lifecycle signals

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use super::events::{SignalBus, TaskEvent, TaskEventKind};
use super::executor::TaskExecutor;
use crate::model::TaskStatus;
use crate::operations::{FailureKind, OperationFailure};
use crate::workflows::OperationTask;

/// How an operation task ended after its retry policy ran out or it succeeded
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded {
        attempts: u32,
        started_at: DateTime<Utc>,
    },
    /// Failed on every attempt but marked `ignore_failure`
    Ignored {
        attempts: u32,
        started_at: DateTime<Utc>,
        failure: OperationFailure,
    },
    Failed {
        attempts: u32,
        started_at: DateTime<Utc>,
        failure: OperationFailure,
    },
}

impl TaskOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            TaskOutcome::Succeeded { attempts, .. }
            | TaskOutcome::Ignored { attempts, .. }
            | TaskOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

pub struct TaskScheduler {
    executor: Arc<dyn TaskExecutor>,
    signals: Arc<SignalBus>,
    semaphore: Option<Arc<Semaphore>>,
    task_timeout: Option<Duration>,
}

impl TaskScheduler {
    pub fn new(executor: Arc<dyn TaskExecutor>, signals: Arc<SignalBus>) -> Self {
        Self {
            executor,
            signals,
            semaphore: None,
            task_timeout: None,
        }
    }

    /// Cap simultaneous attempts; 0 means unbounded
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.semaphore = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        self
    }

    /// Treat attempts running longer than `task_timeout` as failed
    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = Some(task_timeout);
        self
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    /// Run `task` until it succeeds or its attempts are exhausted
    #[instrument(skip_all, fields(task = %task.name))]
    pub async fn run_task(&self, task: &OperationTask) -> TaskOutcome {
        let started_at = Utc::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                "Executing task {} (attempt {}/{})",
                task.name, attempt, task.max_attempts
            );
            self.signals
                .emit(TaskEvent::new(
                    TaskEventKind::Started,
                    task,
                    attempt,
                    TaskStatus::Started,
                    None,
                ))
                .await;

            let failure = match self.attempt(task, attempt).await {
                Ok(()) => {
                    debug!("Task {} succeeded on attempt {}", task.name, attempt);
                    self.signals
                        .emit(TaskEvent::new(
                            TaskEventKind::Success,
                            task,
                            attempt,
                            TaskStatus::Success,
                            None,
                        ))
                        .await;
                    return TaskOutcome::Succeeded {
                        attempts: attempt,
                        started_at,
                    };
                }
                Err(failure) => failure,
            };

            if !failure.is_fatal() && task.max_attempts.allows_retry(attempt) {
                warn!(
                    "Task {} failed on attempt {}: {}",
                    task.name, attempt, failure
                );
                self.signals
                    .emit(TaskEvent::new(
                        TaskEventKind::Retry,
                        task,
                        attempt,
                        TaskStatus::Retrying,
                        Some(failure),
                    ))
                    .await;

                if !task.retry_interval.is_zero() {
                    debug!("Waiting {:?} before retry", task.retry_interval);
                    sleep(task.retry_interval).await;
                }
                continue;
            }

            error!(
                "Task {} failed after {} attempts: {}",
                task.name, attempt, failure
            );
            self.signals
                .emit(TaskEvent::new(
                    TaskEventKind::Failure,
                    task,
                    attempt,
                    TaskStatus::Failed,
                    Some(failure.clone()),
                ))
                .await;

            // Fatal failures abort the workflow even for ignore_failure tasks
            return if task.ignore_failure && !failure.is_fatal() {
                TaskOutcome::Ignored {
                    attempts: attempt,
                    started_at,
                    failure,
                }
            } else {
                TaskOutcome::Failed {
                    attempts: attempt,
                    started_at,
                    failure,
                }
            };
        }
    }

    async fn attempt(&self, task: &OperationTask, attempt: u32) -> Result<(), OperationFailure> {
        let _permit = match &self.semaphore {
            Some(semaphore) => Some(Arc::clone(semaphore).acquire_owned().await.map_err(|_| {
                OperationFailure::new(FailureKind::Crashed, "scheduler is shutting down")
            })?),
            None => None,
        };

        match self.task_timeout {
            Some(limit) => match timeout(limit, self.executor.execute(task, attempt)).await {
                Ok(result) => result,
                Err(_) => Err(OperationFailure::new(
                    FailureKind::Timeout,
                    format!("attempt timed out after {:?}", limit),
                )),
            },
            None => self.executor.execute(task, attempt).await,
        }
    }
}
