// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides a stored two-tier deployment, workflow contexts, engines and an event collector

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use conductor::context::{TaskDefaults, WorkflowContext, WorkflowContextOptions};
use conductor::engine::{
    InProcessExecutor, TaskEvent, TaskEventHandler, TaskEventKind, WorkflowEngine,
};
use conductor::model::{
    Deployment, Node, NodeInstance, OperationSpec, Parameter, ParameterType, Relationship,
    RelationshipInstance, Topology, TopologyDocument,
};
use conductor::operations::builtin;
use conductor::operations::OperationRegistry;
use conductor::storage::{ModelStorage, ResourceStorage};

/// A deployment with a web server that depends on a database
///
/// Both nodes share the same operations table:
/// `noop`, `fail`, `flaky`, `sleep`, `set_property` and `set_state`.
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub model: ModelStorage,
    pub resource: ResourceStorage,
    pub deployment: Deployment,
}

fn operations(node: Node) -> Node {
    node.with_operation("noop", OperationSpec::new(builtin::NOOP))
        .with_operation("fail", OperationSpec::new(builtin::FAIL))
        .with_operation(
            "flaky",
            OperationSpec::new(builtin::FLAKY).with_input(
                "succeed_on",
                Parameter::new(ParameterType::Int, "3"),
            ),
        )
        .with_operation(
            "sleep",
            OperationSpec::new(builtin::SLEEP)
                .with_input("duration_ms", Parameter::new(ParameterType::Int, "50")),
        )
        .with_operation("set_property", OperationSpec::new(builtin::SET_RUNTIME_PROPERTY))
        .with_operation("set_state", OperationSpec::new(builtin::SET_STATE))
}

pub fn test_document(name: &str) -> TopologyDocument {
    let db = operations(
        Node::new("db", "Database").with_type_hierarchy(vec![
            "Database".to_string(),
            "Root".to_string(),
        ]),
    );
    let web = operations(
        Node::new("web", "WebServer").with_type_hierarchy(vec![
            "WebServer".to_string(),
            "SoftwareComponent".to_string(),
            "Root".to_string(),
        ]),
    );

    let db_1 = NodeInstance::new("db_1", "db");
    let web_1 = NodeInstance::new("web_1", "web");
    let relationship = Relationship::new("web_to_db", "web", "db")
        .with_source_operation("preconfigure", OperationSpec::new(builtin::NOOP))
        .with_target_operation(
            "establish",
            OperationSpec::new(builtin::SET_RUNTIME_PROPERTY),
        );
    let connection = RelationshipInstance::new("web_to_db", &web_1.id, &db_1.id);

    TopologyDocument {
        deployment: Deployment::new(name),
        topology: Topology {
            nodes: vec![db, web],
            node_instances: vec![db_1, web_1],
            relationships: vec![relationship],
            relationship_instances: vec![connection],
        },
    }
}

impl TestEnvironment {
    pub async fn new() -> Self {
        Self::with_document(test_document("test")).await
    }

    pub async fn with_document(document: TopologyDocument) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let model = ModelStorage::sqlite(temp_dir.path().join("model.db"))
            .await
            .expect("Failed to open model storage");
        let resource = ResourceStorage::filesystem(temp_dir.path().join("resources"))
            .await
            .expect("Failed to open resource storage");
        let deployment = model
            .put_topology(&document)
            .await
            .expect("Failed to store topology");

        Self {
            temp_dir,
            model,
            resource,
            deployment,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("model.db")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub async fn context(&self, workflow_name: &str) -> Arc<WorkflowContext> {
        self.context_with_defaults(workflow_name, TaskDefaults::default())
            .await
    }

    pub async fn context_with_defaults(
        &self,
        workflow_name: &str,
        defaults: TaskDefaults,
    ) -> Arc<WorkflowContext> {
        WorkflowContext::create(
            WorkflowContextOptions::new(workflow_name, &self.deployment.id)
                .with_defaults(defaults),
            self.model.clone(),
            Some(self.resource.clone()),
        )
        .await
        .expect("Failed to create workflow context")
    }

    pub async fn topology(&self) -> Topology {
        self.model
            .topology(&self.deployment.id)
            .await
            .expect("Failed to load topology")
    }

    pub async fn instance(&self, name: &str) -> NodeInstance {
        self.model
            .node_instances()
            .get_by_name(name)
            .await
            .expect("Unknown node instance")
    }
}

pub fn in_process_engine() -> WorkflowEngine {
    in_process_engine_with(OperationRegistry::with_builtins())
}

pub fn in_process_engine_with(registry: OperationRegistry) -> WorkflowEngine {
    WorkflowEngine::new(Arc::new(InProcessExecutor::new(registry)))
}

/// Records every task event it sees, in delivery order
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<TaskEvent>>,
}

impl EventCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event kinds seen for the task named `task_name`
    pub fn kinds_for(&self, task_name: &str) -> Vec<TaskEventKind> {
        self.events()
            .into_iter()
            .filter(|event| event.task_name == task_name)
            .map(|event| event.kind)
            .collect()
    }

    /// Task names in the order their first success was observed
    pub fn success_order(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == TaskEventKind::Success)
            .map(|event| event.task_name)
            .collect()
    }
}

#[async_trait]
impl TaskEventHandler for EventCollector {
    async fn handle(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
