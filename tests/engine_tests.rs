// ABOUTME: Integration tests for the workflow execution engine
// ABOUTME: Tests dependency ordering, retry policy, ignored failures, aborts and execution bookkeeping

use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conductor::context::TaskDefaults;
use conductor::engine::{
    run_workflow, EngineError, TaskEventKind, TaskExecutor, TaskRecorder, WorkflowEngine,
};
use conductor::model::{ExecutionStatus, Properties, TaskStatus};
use conductor::operations::{FailureKind, OperationFailure};
use conductor::workflows::builtin::execute_operation::{execute_operation, ExecuteOperationParams};
use conductor::workflows::{MaxAttempts, OperationTask, StubTask, TaskGraph, WorkflowTask};

mod common;
use common::{in_process_engine, EventCollector, TestEnvironment};

fn retrying(attempts: u32) -> TaskDefaults {
    TaskDefaults {
        max_attempts: MaxAttempts::Limited(attempts),
        retry_interval: Duration::from_millis(10),
        ignore_failure: false,
    }
}

#[tokio::test]
async fn test_dependency_order_is_respected() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("install").await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;
    let web_1 = env.instance("web_1").await;

    let engine = in_process_engine();
    let collector = EventCollector::new();
    engine.signals().subscribe(collector.clone());

    let mut graph = TaskGraph::new("install");
    // db sleeps longer, so without the edge web would finish first
    let mut inputs = Properties::new();
    inputs.insert("duration_ms".to_string(), json!(1));
    let db_task = OperationTask::node_instance(&ctx, &topology, &db_1, "sleep", Properties::new())
        .unwrap();
    let web_task = OperationTask::node_instance(&ctx, &topology, &web_1, "sleep", inputs).unwrap();
    let db_id = graph.add_task(db_task.clone()).unwrap();
    let web_id = graph.add_task(web_task.clone()).unwrap();
    graph.add_dependency(&web_id, &[db_id]).unwrap();

    let report = engine.execute(&graph).await.unwrap();

    assert_eq!(report.summary.total_tasks, 2);
    assert_eq!(report.summary.successful_tasks, 2);
    assert_eq!(collector.success_order(), vec![db_task.name.clone(), web_task.name.clone()]);

    let web_started = collector
        .events()
        .into_iter()
        .find(|e| e.task_name == web_task.name && e.kind == TaskEventKind::Started)
        .unwrap();
    let db_succeeded = collector
        .events()
        .into_iter()
        .find(|e| e.task_name == db_task.name && e.kind == TaskEventKind::Success)
        .unwrap();
    assert!(db_succeeded.timestamp <= web_started.timestamp);
}

#[tokio::test]
async fn test_flaky_task_retries_until_success() {
    let env = TestEnvironment::new().await;
    let ctx = env.context_with_defaults("install", retrying(3)).await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;

    let engine = in_process_engine();
    let collector = EventCollector::new();
    engine.signals().subscribe(collector.clone());

    let task = OperationTask::node_instance(&ctx, &topology, &db_1, "flaky", Properties::new())
        .unwrap();
    let name = task.name.clone();
    let mut graph = TaskGraph::new("flaky");
    graph.add_task(task).unwrap();

    let report = engine.execute(&graph).await.unwrap();

    assert_eq!(report.task(&name).unwrap().attempts, 3);
    assert_eq!(report.task(&name).unwrap().status, TaskStatus::Success);
    assert_eq!(
        collector.kinds_for(&name),
        vec![
            TaskEventKind::Started,
            TaskEventKind::Retry,
            TaskEventKind::Started,
            TaskEventKind::Retry,
            TaskEventKind::Started,
            TaskEventKind::Success,
        ]
    );

    let stored = env.instance("db_1").await;
    assert_eq!(stored.runtime_properties["flaky_runs"], json!(3));
}

#[tokio::test]
async fn test_exhausted_retries_abort_with_executor_error() {
    let env = TestEnvironment::new().await;
    let ctx = env.context_with_defaults("install", retrying(3)).await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;
    let web_1 = env.instance("web_1").await;

    let engine = in_process_engine();
    let collector = EventCollector::new();
    engine.signals().subscribe(collector.clone());

    let mut inputs = Properties::new();
    inputs.insert("message".to_string(), json!("disk full"));
    let failing = OperationTask::node_instance(&ctx, &topology, &db_1, "fail", inputs).unwrap();
    let dependent = OperationTask::node_instance(&ctx, &topology, &web_1, "noop", Properties::new())
        .unwrap();
    let dependent_name = dependent.name.clone();

    let mut graph = TaskGraph::new("failing");
    let failing_id = graph.add_task(failing).unwrap();
    let dependent_id = graph.add_task(dependent).unwrap();
    graph.add_dependency(&dependent_id, &[failing_id]).unwrap();

    let error = engine.execute(&graph).await.unwrap_err();
    match &error {
        EngineError::Executor {
            attempts, source, ..
        } => {
            assert_eq!(*attempts, 3);
            assert_eq!(source.kind, FailureKind::Operation);
            assert!(source.message.contains("disk full"));
        }
        other => panic!("expected executor error, got {other}"),
    }
    assert!(error.task_failure().is_some());

    // The dependent never started
    assert!(collector.kinds_for(&dependent_name).is_empty());
    let kinds: Vec<_> = collector.events().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds.iter().filter(|k| **k == TaskEventKind::Retry).count(), 2);
    assert_eq!(kinds.last(), Some(&TaskEventKind::Failure));
}

#[tokio::test]
async fn test_ignored_failure_lets_dependents_run() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("install").await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;
    let web_1 = env.instance("web_1").await;

    let engine = in_process_engine();
    let collector = EventCollector::new();
    engine.signals().subscribe(collector.clone());

    let failing = OperationTask::node_instance(&ctx, &topology, &db_1, "fail", Properties::new())
        .unwrap()
        .with_max_attempts(2)
        .unwrap()
        .with_ignore_failure(true);
    let failing_name = failing.name.clone();
    let dependent = OperationTask::node_instance(&ctx, &topology, &web_1, "noop", Properties::new())
        .unwrap();
    let dependent_name = dependent.name.clone();

    let mut graph = TaskGraph::new("ignored");
    let failing_id = graph.add_task(failing).unwrap();
    let dependent_id = graph.add_task(dependent).unwrap();
    graph.add_dependency(&dependent_id, &[failing_id]).unwrap();

    let report = engine.execute(&graph).await.unwrap();

    assert!(report.has_ignored_failures());
    assert_eq!(report.summary.ignored_failures, 1);
    assert_eq!(report.summary.successful_tasks, 1);
    let ignored = report.task(&failing_name).unwrap();
    assert!(ignored.ignored);
    assert_eq!(ignored.attempts, 2);
    assert_eq!(ignored.status, TaskStatus::Failed);

    // Failures stay visible to observers even when ignored
    assert_eq!(
        collector.kinds_for(&failing_name),
        vec![
            TaskEventKind::Started,
            TaskEventKind::Retry,
            TaskEventKind::Started,
            TaskEventKind::Failure,
        ]
    );
    assert_eq!(
        collector.kinds_for(&dependent_name).last(),
        Some(&TaskEventKind::Success)
    );
}

#[tokio::test]
async fn test_stubs_and_nested_workflows() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("install").await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;
    let web_1 = env.instance("web_1").await;

    let engine = in_process_engine();
    let collector = EventCollector::new();
    engine.signals().subscribe(collector.clone());

    let inner = WorkflowTask::new(&ctx, "prepare_db", |child, graph| {
        let first = graph.add_task(OperationTask::node_instance(
            child,
            &topology,
            &db_1,
            "sleep",
            Properties::new(),
        )?)?;
        let second = graph.add_task(OperationTask::node_instance(
            child,
            &topology,
            &db_1,
            "noop",
            Properties::new(),
        )?)?;
        graph.add_dependency(&second, &[first])?;
        Ok(())
    })
    .unwrap();

    let web_task = OperationTask::node_instance(&ctx, &topology, &web_1, "noop", Properties::new())
        .unwrap();
    let web_name = web_task.name.clone();

    let mut graph = TaskGraph::new("nested");
    let inner_id = graph.add_task(inner).unwrap();
    let join = graph.add_task(StubTask::new(&ctx)).unwrap();
    let web_id = graph.add_task(web_task).unwrap();
    graph.add_dependency(&join, &[inner_id]).unwrap();
    graph.add_dependency(&web_id, &[join]).unwrap();

    let report = engine.execute(&graph).await.unwrap();

    // Stubs and workflow wrappers do not appear as operation tasks
    assert_eq!(report.summary.total_tasks, 3);
    assert_eq!(
        collector.success_order(),
        vec![
            format!("sleep.{}", db_1.id),
            format!("noop.{}", db_1.id),
            web_name,
        ]
    );
}

#[tokio::test]
async fn test_failure_aborts_in_flight_tasks() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("install").await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;
    let web_1 = env.instance("web_1").await;

    let engine = in_process_engine();
    let collector = EventCollector::new();
    engine.signals().subscribe(collector.clone());

    let mut long_sleep = Properties::new();
    long_sleep.insert("duration_ms".to_string(), json!(10_000));
    let sleeper =
        OperationTask::node_instance(&ctx, &topology, &web_1, "sleep", long_sleep).unwrap();
    let sleeper_name = sleeper.name.clone();
    let failing = OperationTask::node_instance(&ctx, &topology, &db_1, "fail", Properties::new())
        .unwrap();

    let mut graph = TaskGraph::new("abort");
    graph.add_task(sleeper).unwrap();
    graph.add_task(failing).unwrap();

    let started = Instant::now();
    let result = engine.execute(&graph).await;

    assert!(matches!(result, Err(EngineError::Executor { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!collector
        .kinds_for(&sleeper_name)
        .contains(&TaskEventKind::Success));
}

/// Executor whose context never makes it across the process boundary
struct UndeliverableContext {
    invocations: AtomicU32,
}

#[async_trait::async_trait]
impl TaskExecutor for UndeliverableContext {
    async fn execute(&self, _task: &OperationTask, _attempt: u32) -> Result<(), OperationFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(OperationFailure::new(FailureKind::Serialization, "unknown api"))
    }
}

#[tokio::test]
async fn test_serialization_failure_is_not_retried() {
    let env = TestEnvironment::new().await;
    let ctx = env.context_with_defaults("install", retrying(3)).await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;

    let executor = Arc::new(UndeliverableContext {
        invocations: AtomicU32::new(0),
    });
    let engine = WorkflowEngine::new(executor.clone());
    let collector = EventCollector::new();
    engine.signals().subscribe(collector.clone());

    // Even an ignore_failure task cannot swallow a fatal failure
    let task = OperationTask::node_instance(&ctx, &topology, &db_1, "noop", Properties::new())
        .unwrap()
        .with_ignore_failure(true);
    let task_name = task.name.clone();
    let mut graph = TaskGraph::new("serialization");
    graph.add_task(task).unwrap();

    let error = engine.execute(&graph).await.unwrap_err();
    match &error {
        EngineError::Executor {
            attempts, source, ..
        } => {
            assert_eq!(*attempts, 1);
            assert_eq!(source.kind, FailureKind::Serialization);
        }
        other => panic!("expected executor error, got {other}"),
    }
    assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        collector.kinds_for(&task_name),
        vec![TaskEventKind::Started, TaskEventKind::Failure]
    );
}

#[tokio::test]
async fn test_unknown_mapping_is_not_retried() {
    let env = TestEnvironment::new().await;
    let ctx = env
        .context_with_defaults(
            "install",
            TaskDefaults {
                max_attempts: MaxAttempts::Limited(3),
                retry_interval: Duration::from_secs(5),
                ignore_failure: false,
            },
        )
        .await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;

    let mut task = OperationTask::node_instance(&ctx, &topology, &db_1, "noop", Properties::new())
        .unwrap();
    task.operation_mapping = "missing.operation".to_string();
    let mut graph = TaskGraph::new("unknown_mapping");
    graph.add_task(task).unwrap();

    let started = Instant::now();
    let error = in_process_engine().execute(&graph).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));

    let failure = error.task_failure().unwrap();
    assert_eq!(failure.kind, FailureKind::UnknownMapping);
    assert!(failure.message.contains("missing.operation"));
    assert!(matches!(error, EngineError::Executor { attempts: 1, .. }));
}

#[tokio::test]
async fn test_task_timeout_is_a_failure() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("install").await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;

    let engine = in_process_engine().with_task_timeout(Duration::from_millis(20));

    let mut inputs = Properties::new();
    inputs.insert("duration_ms".to_string(), json!(2_000));
    let task = OperationTask::node_instance(&ctx, &topology, &db_1, "sleep", inputs).unwrap();
    let mut graph = TaskGraph::new("timeout");
    graph.add_task(task).unwrap();

    let error = engine.execute(&graph).await.unwrap_err();
    assert_eq!(error.task_failure().unwrap().kind, FailureKind::Timeout);
}

#[tokio::test]
async fn test_run_workflow_tracks_execution_and_tasks() {
    let env = TestEnvironment::new().await;
    let ctx = env.context_with_defaults("install", retrying(2)).await;
    let topology = env.topology().await;

    let engine = in_process_engine();
    engine
        .signals()
        .subscribe(Arc::new(TaskRecorder::new(env.model.clone())));

    let params = ExecuteOperationParams::new("set_state").with_kwargs({
        let mut kwargs = Properties::new();
        kwargs.insert("state".to_string(), json!("started"));
        kwargs
    });
    let report = run_workflow(&engine, &ctx, |ctx, graph| {
        execute_operation(ctx, &topology, graph, &params).map(|_| ())
    })
    .await
    .unwrap();
    assert_eq!(report.summary.successful_tasks, 2);

    let execution = ctx.execution().await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(execution.ended_at.is_some());

    let records = env
        .model
        .tasks()
        .list_for_execution(&ctx.execution_id)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.status, TaskStatus::Success);
        assert_eq!(record.attempts_count, 1);
        assert_eq!(record.max_attempts, Some(2));
        assert!(record.started_at.is_some());
        assert!(record.ended_at.is_some());
    }

    assert_eq!(env.instance("db_1").await.state, "started");
    assert_eq!(env.instance("web_1").await.state, "started");
}

#[tokio::test]
async fn test_run_workflow_marks_failed_execution() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("install").await;
    let topology = env.topology().await;

    let engine = in_process_engine();
    let params = ExecuteOperationParams::new("fail");
    let result = run_workflow(&engine, &ctx, |ctx, graph| {
        execute_operation(ctx, &topology, graph, &params).map(|_| ())
    })
    .await;
    assert!(result.is_err());

    let execution = ctx.execution().await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.unwrap().contains("requested failure"));
}

#[tokio::test]
async fn test_run_workflow_build_error_fails_execution() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("install").await;
    let topology = env.topology().await;

    let engine = in_process_engine();
    let params = ExecuteOperationParams::new("does_not_exist");
    let result = run_workflow(&engine, &ctx, |ctx, graph| {
        execute_operation(ctx, &topology, graph, &params).map(|_| ())
    })
    .await;

    assert!(matches!(result, Err(EngineError::Workflow(_))));
    let execution = ctx.execution().await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
}
