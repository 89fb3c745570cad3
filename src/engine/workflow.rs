// ABOUTME: Graph driver that runs a task graph in dependency order with unbounded fan-out
// ABOUTME: Sub-workflows are driven recursively; an unignored failure aborts everything in flight

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use super::error::{EngineError, Result};
use super::events::SignalBus;
use super::executor::TaskExecutor;
use super::result::{ExecutionReport, TaskReport};
use super::scheduler::{TaskOutcome, TaskScheduler};
use crate::context::WorkflowContext;
use crate::model::ExecutionStatus;
use crate::workflows::{GraphApi, Task, TaskGraph, TaskGraphError, WorkflowError};

pub struct WorkflowEngine {
    scheduler: TaskScheduler,
}

impl WorkflowEngine {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self::with_signals(executor, Arc::new(SignalBus::new()))
    }

    pub fn with_signals(executor: Arc<dyn TaskExecutor>, signals: Arc<SignalBus>) -> Self {
        Self {
            scheduler: TaskScheduler::new(executor, signals),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.scheduler = self.scheduler.with_max_concurrent(max_concurrent);
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.scheduler = self.scheduler.with_task_timeout(task_timeout);
        self
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        self.scheduler.signals()
    }

    /// Run every task of `graph`, respecting dependencies
    #[instrument(skip_all, fields(graph = %graph.name()))]
    pub async fn execute(&self, graph: &TaskGraph) -> Result<ExecutionReport> {
        let start_time = Utc::now();
        info!(
            "Executing graph '{}': {} tasks in {} batches",
            graph.name(),
            graph.len(),
            graph.execution_batches().len()
        );

        let tasks = self.drive(graph).await?;
        let report = ExecutionReport::new(graph.name(), start_time, tasks);

        info!(
            "Graph '{}' completed in {:?}: {}/{} operation tasks succeeded",
            graph.name(),
            report.duration,
            report.summary.successful_tasks,
            report.summary.total_tasks
        );
        Ok(report)
    }

    fn drive<'a>(&'a self, graph: &'a TaskGraph) -> BoxFuture<'a, Result<Vec<TaskReport>>> {
        async move {
            let mut waiting: HashMap<String, usize> = HashMap::new();
            let mut ready: VecDeque<String> = VecDeque::new();
            for id in graph.task_ids() {
                let dependencies = graph.dependencies(&id).len();
                if dependencies == 0 {
                    ready.push_back(id);
                } else {
                    waiting.insert(id, dependencies);
                }
            }

            let mut in_flight = FuturesUnordered::new();
            let mut reports = Vec::new();
            let mut finished = 0;

            loop {
                while let Some(id) = ready.pop_front() {
                    let task = graph
                        .get_task(&id)
                        .ok_or_else(|| TaskGraphError::UnknownTask(id.clone()))?;
                    in_flight.push(async move { (id, self.run_node(task).await) });
                }

                let Some((id, result)) = in_flight.next().await else {
                    break;
                };
                // Returning here drops every in-flight attempt
                reports.extend(result?);
                finished += 1;

                for dependent in graph.dependents(&id) {
                    if let Some(count) = waiting.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            waiting.remove(&dependent);
                            ready.push_back(dependent);
                        }
                    }
                }
            }

            if finished < graph.len() {
                return Err(EngineError::Stalled {
                    pending: graph.len() - finished,
                });
            }
            Ok(reports)
        }
        .boxed()
    }

    fn run_node<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<Vec<TaskReport>>> {
        match task {
            Task::Operation(operation) => async move {
                let outcome = self.scheduler.run_task(operation).await;
                let report = TaskReport::new(operation, &outcome);
                match outcome {
                    TaskOutcome::Failed {
                        attempts, failure, ..
                    } => Err(EngineError::Executor {
                        task: operation.name.clone(),
                        task_id: operation.id.clone(),
                        attempts,
                        source: failure,
                    }),
                    TaskOutcome::Succeeded { .. } | TaskOutcome::Ignored { .. } => {
                        Ok(vec![report])
                    }
                }
            }
            .boxed(),
            Task::Workflow(workflow) => async move {
                debug!("Entering sub-workflow '{}'", workflow.name);
                let reports = self.drive(workflow.graph()).await?;
                debug!("Sub-workflow '{}' finished", workflow.name);
                Ok(reports)
            }
            .boxed(),
            Task::Stub(_) => async { Ok(Vec::new()) }.boxed(),
        }
    }
}

/// Build a graph with `build`, run it, and keep the execution record's status current
pub async fn run_workflow<F>(
    engine: &WorkflowEngine,
    ctx: &Arc<WorkflowContext>,
    build: F,
) -> Result<ExecutionReport>
where
    F: FnOnce(&Arc<WorkflowContext>, &mut TaskGraph) -> std::result::Result<(), WorkflowError>,
{
    let executions = ctx.model().executions();

    let mut graph = TaskGraph::new(ctx.workflow_name.clone());
    if let Err(e) = build(ctx, &mut graph) {
        executions
            .set_status(&ctx.execution_id, ExecutionStatus::Failed, Some(e.to_string()))
            .await?;
        return Err(e.into());
    }

    executions
        .set_status(&ctx.execution_id, ExecutionStatus::Started, None)
        .await?;

    match engine.execute(&graph).await {
        Ok(report) => {
            executions
                .set_status(&ctx.execution_id, ExecutionStatus::Succeeded, None)
                .await?;
            Ok(report)
        }
        Err(e) => {
            error!("Execution {} failed: {}", ctx.execution_id, e);
            executions
                .set_status(&ctx.execution_id, ExecutionStatus::Failed, Some(e.to_string()))
                .await?;
            Err(e)
        }
    }
}
