// ABOUTME: Result types for a completed graph run and its individual operation tasks
// ABOUTME: Aggregates per-task outcomes into a summary for logging and the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::scheduler::TaskOutcome;
use crate::model::TaskStatus;
use crate::workflows::OperationTask;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskReport {
    pub task_id: String,
    pub name: String,
    pub actor_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Failed but did not abort the workflow
    pub ignored: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub graph_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
    pub tasks: Vec<TaskReport>,
    pub summary: ExecutionSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSummary {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub ignored_failures: usize,
    pub total_attempts: u32,
    pub success_rate: f64,
}

impl TaskReport {
    pub fn new(task: &OperationTask, outcome: &TaskOutcome) -> Self {
        let (status, ignored, error, started_at) = match outcome {
            TaskOutcome::Succeeded { started_at, .. } => {
                (TaskStatus::Success, false, None, *started_at)
            }
            TaskOutcome::Ignored {
                started_at,
                failure,
                ..
            } => (TaskStatus::Failed, true, Some(failure.to_string()), *started_at),
            TaskOutcome::Failed {
                started_at,
                failure,
                ..
            } => (TaskStatus::Failed, false, Some(failure.to_string()), *started_at),
        };

        Self {
            task_id: task.id.clone(),
            name: task.name.clone(),
            actor_id: task.actor.id().to_string(),
            status,
            attempts: outcome.attempts(),
            ignored,
            error,
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

impl ExecutionReport {
    pub fn new(
        graph_name: impl Into<String>,
        start_time: DateTime<Utc>,
        tasks: Vec<TaskReport>,
    ) -> Self {
        let end_time = Utc::now();
        let summary = ExecutionSummary::from_tasks(&tasks);
        Self {
            graph_name: graph_name.into(),
            start_time,
            end_time,
            duration: (end_time - start_time).to_std().unwrap_or(Duration::ZERO),
            tasks,
            summary,
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn has_ignored_failures(&self) -> bool {
        self.summary.ignored_failures > 0
    }
}

impl ExecutionSummary {
    pub fn from_tasks(tasks: &[TaskReport]) -> Self {
        let total = tasks.len();
        let successful = tasks.iter().filter(|t| t.is_successful()).count();
        let ignored = tasks.iter().filter(|t| t.ignored).count();

        let success_rate = if total > 0 {
            (successful as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Self {
            total_tasks: total,
            successful_tasks: successful,
            ignored_failures: ignored,
            total_attempts: tasks.iter().map(|t| t.attempts).sum(),
            success_rate,
        }
    }
}
