// ABOUTME: Integration tests for the builtin execute_operation workflow
// ABOUTME: Tests instance filtering, dependency-ordered edges, stubs and kwargs forwarding

use serde_json::json;

use conductor::model::Properties;
use conductor::workflows::builtin::execute_operation::{
    execute_operation, filter_node_instances, ExecuteOperationParams,
};
use conductor::workflows::{Task, TaskGraph};

mod common;
use common::{in_process_engine, TestEnvironment};

fn operation_names(graph: &TaskGraph) -> Vec<String> {
    graph
        .tasks()
        .filter_map(Task::as_operation)
        .map(|task| task.name.clone())
        .collect()
}

#[tokio::test]
async fn test_filters() {
    let env = TestEnvironment::new().await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;
    let web_1 = env.instance("web_1").await;

    let selected = |params: ExecuteOperationParams| -> Vec<String> {
        filter_node_instances(&topology, &params)
            .into_iter()
            .map(|instance| instance.name.clone())
            .collect()
    };

    assert_eq!(
        selected(ExecuteOperationParams::new("noop")),
        vec!["db_1", "web_1"]
    );
    assert_eq!(
        selected(ExecuteOperationParams::new("noop").with_node_ids(vec!["web".to_string()])),
        vec!["web_1"]
    );
    // Matches an ancestor type, not just the declared one
    assert_eq!(
        selected(
            ExecuteOperationParams::new("noop")
                .with_type_names(vec!["SoftwareComponent".to_string()])
        ),
        vec!["web_1"]
    );
    assert_eq!(
        selected(
            ExecuteOperationParams::new("noop").with_type_names(vec!["Root".to_string()])
        ),
        vec!["db_1", "web_1"]
    );
    assert_eq!(
        selected(
            ExecuteOperationParams::new("noop").with_node_instance_ids(vec![db_1.id.clone()])
        ),
        vec!["db_1"]
    );
    assert_eq!(
        selected(
            ExecuteOperationParams::new("noop")
                .with_node_instance_ids(vec!["web_1".to_string(), "unknown".to_string()])
        ),
        vec!["web_1"]
    );

    // Criteria intersect
    let none = selected(
        ExecuteOperationParams::new("noop")
            .with_node_ids(vec!["db".to_string()])
            .with_type_names(vec!["WebServer".to_string()]),
    );
    assert!(none.is_empty());
    assert_ne!(db_1.id, web_1.id);
}

#[tokio::test]
async fn test_unordered_tasks_have_no_edges() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("execute_operation").await;
    let topology = env.topology().await;

    let mut graph = TaskGraph::new("execute_operation");
    let ids = execute_operation(
        &ctx,
        &topology,
        &mut graph,
        &ExecuteOperationParams::new("noop"),
    )
    .unwrap();

    assert_eq!(ids.len(), 2);
    assert_eq!(graph.len(), 2);
    for id in &ids {
        assert!(graph.dependencies(id).is_empty());
    }
}

#[tokio::test]
async fn test_dependency_order_adds_relationship_edges() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("execute_operation").await;
    let topology = env.topology().await;
    let db_1 = env.instance("db_1").await;
    let web_1 = env.instance("web_1").await;

    let mut graph = TaskGraph::new("execute_operation");
    let ids = execute_operation(
        &ctx,
        &topology,
        &mut graph,
        &ExecuteOperationParams::new("noop").with_dependency_order(true),
    )
    .unwrap();

    let task_for = |instance_id: &str| {
        ids.iter()
            .find(|id| {
                graph
                    .get_task(id)
                    .and_then(Task::as_operation)
                    .is_some_and(|task| task.actor.id() == instance_id)
            })
            .cloned()
            .unwrap()
    };
    let db_task = task_for(&db_1.id);
    let web_task = task_for(&web_1.id);

    assert_eq!(graph.dependencies(&web_task), vec![db_task.clone()]);
    assert!(graph.dependencies(&db_task).is_empty());
}

#[tokio::test]
async fn test_unselected_instances_become_stubs() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("execute_operation").await;
    let topology = env.topology().await;
    let web_1 = env.instance("web_1").await;

    let mut graph = TaskGraph::new("execute_operation");
    let ids = execute_operation(
        &ctx,
        &topology,
        &mut graph,
        &ExecuteOperationParams::new("noop")
            .with_node_ids(vec!["web".to_string()])
            .with_dependency_order(true),
    )
    .unwrap();

    assert_eq!(ids.len(), 1);
    assert_eq!(graph.len(), 2);
    assert_eq!(operation_names(&graph), vec![format!("noop.{}", web_1.id)]);

    let dependencies = graph.dependencies(&ids[0]);
    assert_eq!(dependencies.len(), 1);
    assert_eq!(graph.get_task(&dependencies[0]).unwrap().kind(), "stub");

    let report = in_process_engine().execute(&graph).await.unwrap();
    assert_eq!(report.summary.total_tasks, 1);
    assert_eq!(report.summary.successful_tasks, 1);
}

#[tokio::test]
async fn test_kwargs_are_forwarded() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("execute_operation").await;
    let topology = env.topology().await;

    let mut kwargs = Properties::new();
    kwargs.insert("duration_ms".to_string(), json!(1));
    let mut params = ExecuteOperationParams::new("sleep").with_kwargs(kwargs);
    params.allow_kwargs_override = Some(true);

    let mut graph = TaskGraph::new("execute_operation");
    execute_operation(&ctx, &topology, &mut graph, &params).unwrap();

    for task in graph.tasks().filter_map(Task::as_operation) {
        assert_eq!(task.inputs["duration_ms"], json!(1));
        assert_eq!(task.inputs["allow_kwargs_override"], json!(true));
    }
}

#[tokio::test]
async fn test_ordered_run_updates_every_instance() {
    let env = TestEnvironment::new().await;
    let ctx = env.context("execute_operation").await;
    let topology = env.topology().await;

    let mut kwargs = Properties::new();
    kwargs.insert("key".to_string(), json!("configured"));
    kwargs.insert("value".to_string(), json!(true));
    let params = ExecuteOperationParams::new("set_property")
        .with_kwargs(kwargs)
        .with_dependency_order(true);

    let mut graph = TaskGraph::new("execute_operation");
    execute_operation(&ctx, &topology, &mut graph, &params).unwrap();
    in_process_engine().execute(&graph).await.unwrap();

    for name in ["db_1", "web_1"] {
        let instance = env.instance(name).await;
        assert_eq!(instance.runtime_properties["configured"], json!(true));
        assert_eq!(instance.version, 2);
    }
}
