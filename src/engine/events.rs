// ABOUTME: Task lifecycle events and the signal bus that delivers them
// ABOUTME: Registered handlers are awaited in order; a broadcast channel serves passive observers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::model::{RunsOn, TaskRecord, TaskStatus};
use crate::operations::OperationFailure;
use crate::workflows::{MaxAttempts, OperationTask};

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Success,
    Failure,
    Retry,
}

impl fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEventKind::Started => write!(f, "started"),
            TaskEventKind::Success => write!(f, "success"),
            TaskEventKind::Failure => write!(f, "failure"),
            TaskEventKind::Retry => write!(f, "retry"),
        }
    }
}

/// Snapshot of an operation task at a lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: String,
    pub task_name: String,
    pub execution_id: String,
    pub actor_id: String,
    pub operation_mapping: String,
    pub runs_on: RunsOn,
    /// Attempts made so far, counting the current one
    pub attempt: u32,
    pub max_attempts: MaxAttempts,
    pub retry_interval: Duration,
    pub ignore_failure: bool,
    /// Task status after the transition
    pub status: TaskStatus,
    pub error: Option<OperationFailure>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(
        kind: TaskEventKind,
        task: &OperationTask,
        attempt: u32,
        status: TaskStatus,
        error: Option<OperationFailure>,
    ) -> Self {
        Self {
            kind,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            execution_id: task.context.execution_id.clone(),
            actor_id: task.actor.id().to_string(),
            operation_mapping: task.operation_mapping.clone(),
            runs_on: task.runs_on,
            attempt,
            max_attempts: task.max_attempts,
            retry_interval: task.retry_interval,
            ignore_failure: task.ignore_failure,
            status,
            error,
            timestamp: Utc::now(),
        }
    }

    /// Task record reflecting this event
    pub fn to_record(&self) -> TaskRecord {
        let terminal = matches!(self.kind, TaskEventKind::Success | TaskEventKind::Failure);
        TaskRecord {
            id: self.task_id.clone(),
            name: self.task_name.clone(),
            execution_id: self.execution_id.clone(),
            actor_id: self.actor_id.clone(),
            operation_mapping: self.operation_mapping.clone(),
            runs_on: self.runs_on,
            status: self.status,
            attempts_count: self.attempt,
            max_attempts: self.max_attempts.limit(),
            retry_interval: self.retry_interval,
            ignore_failure: self.ignore_failure,
            started_at: (self.kind == TaskEventKind::Started).then_some(self.timestamp),
            ended_at: terminal.then_some(self.timestamp),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Subscriber invoked for every task event
///
/// Handlers observe; they cannot change the outcome of a task.
#[async_trait]
pub trait TaskEventHandler: Send + Sync {
    async fn handle(&self, event: &TaskEvent);
}

pub struct SignalBus {
    handlers: RwLock<Vec<Arc<dyn TaskEventHandler>>>,
    sender: broadcast::Sender<TaskEvent>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn TaskEventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push(handler);
    }

    /// Passive receiver; lagging receivers lose the oldest events
    pub fn receiver(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver an event to every handler in registration order, then broadcast it
    pub async fn emit(&self, event: TaskEvent) {
        let handlers: Vec<Arc<dyn TaskEventHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for handler in handlers {
            handler.handle(&event).await;
        }

        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("handlers", &self.handler_count())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
