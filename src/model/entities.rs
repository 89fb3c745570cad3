// ABOUTME: Entity records for deployments, node/relationship templates and their instances
// ABOUTME: Mutable instances carry a version counter used for optimistic concurrency

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::parameter::Parameter;

/// Free-form JSON object used for runtime properties and operation inputs
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Initial version assigned to a freshly stored mutable entity
pub const INITIAL_VERSION: i64 = 1;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn initial_version() -> i64 {
    INITIAL_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Plugin a node declares; operations name the plugin they are implemented by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub package_version: Option<String>,
}

/// Operation entry declared on a node or relationship template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OperationSpec {
    /// `module.function` mapping resolved by the worker
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub inputs: IndexMap<String, Parameter>,
    #[serde(default)]
    pub plugin: Option<String>,
}

impl OperationSpec {
    pub fn new(mapping: impl Into<String>) -> Self {
        Self {
            operation: Some(mapping.into()),
            inputs: IndexMap::new(),
            plugin: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, parameter: Parameter) -> Self {
        self.inputs.insert(name.into(), parameter);
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }
}

/// Node template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub deployment_id: String,
    pub type_name: String,
    /// Type names from the most derived type up to the root type
    #[serde(default)]
    pub type_hierarchy: Vec<String>,
    #[serde(default)]
    pub operations: IndexMap<String, OperationSpec>,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

impl Node {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            id: id.into(),
            deployment_id: String::new(),
            type_hierarchy: vec![type_name.clone()],
            type_name,
            operations: IndexMap::new(),
            plugins: Vec::new(),
        }
    }

    pub fn with_operation(mut self, name: impl Into<String>, operation: OperationSpec) -> Self {
        self.operations.insert(name.into(), operation);
        self
    }

    pub fn with_plugin(mut self, plugin: PluginSpec) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_type_hierarchy(mut self, hierarchy: Vec<String>) -> Self {
        self.type_hierarchy = hierarchy;
        self
    }

    /// Whether the node's type is, or derives from, `type_name`
    pub fn is_of_type(&self, type_name: &str) -> bool {
        self.type_name == type_name || self.type_hierarchy.iter().any(|t| t == type_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub node_id: String,
    #[serde(default)]
    pub deployment_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub runtime_properties: Properties,
    #[serde(default = "initial_version")]
    pub version: i64,
}

impl NodeInstance {
    pub fn new(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            node_id: node_id.into(),
            deployment_id: String::new(),
            state: "initialized".to_string(),
            runtime_properties: Properties::new(),
            version: INITIAL_VERSION,
        }
    }
}

/// Relationship template between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(default)]
    pub deployment_id: String,
    #[serde(default)]
    pub type_name: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub source_operations: IndexMap<String, OperationSpec>,
    #[serde(default)]
    pub target_operations: IndexMap<String, OperationSpec>,
}

impl Relationship {
    pub fn new(
        id: impl Into<String>,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            deployment_id: String::new(),
            type_name: "depends_on".to_string(),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            source_operations: IndexMap::new(),
            target_operations: IndexMap::new(),
        }
    }

    pub fn with_source_operation(
        mut self,
        name: impl Into<String>,
        operation: OperationSpec,
    ) -> Self {
        self.source_operations.insert(name.into(), operation);
        self
    }

    pub fn with_target_operation(
        mut self,
        name: impl Into<String>,
        operation: OperationSpec,
    ) -> Self {
        self.target_operations.insert(name.into(), operation);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInstance {
    #[serde(default = "new_id")]
    pub id: String,
    pub relationship_id: String,
    #[serde(default)]
    pub deployment_id: String,
    pub source_instance_id: String,
    pub target_instance_id: String,
    #[serde(default)]
    pub runtime_properties: Properties,
    #[serde(default = "initial_version")]
    pub version: i64,
}

impl RelationshipInstance {
    pub fn new(
        relationship_id: impl Into<String>,
        source_instance_id: impl Into<String>,
        target_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            relationship_id: relationship_id.into(),
            deployment_id: String::new(),
            source_instance_id: source_instance_id.into(),
            target_instance_id: target_instance_id.into(),
            runtime_properties: Properties::new(),
            version: INITIAL_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Started,
    Succeeded,
    Failed,
    Cancelled,
}

/// One run of a workflow against a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub deployment_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub parameters: Properties,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Execution {
    pub fn new(deployment_id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            deployment_id: deployment_id.into(),
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Pending,
            parameters: Properties::new(),
            created_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }
}

/// Which end of the topology an operation runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunsOn {
    NodeInstance,
    Source,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Started,
    Retrying,
    Success,
    Failed,
}

/// Persisted status and attempt bookkeeping for one operation task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub execution_id: String,
    pub actor_id: String,
    pub operation_mapping: String,
    pub runs_on: RunsOn,
    pub status: TaskStatus,
    pub attempts_count: u32,
    /// `None` means unlimited attempts
    pub max_attempts: Option<u32>,
    pub retry_interval: Duration,
    pub ignore_failure: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl fmt::Display for RunsOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunsOn::NodeInstance => write!(f, "node_instance"),
            RunsOn::Source => write!(f, "source"),
            RunsOn::Target => write!(f, "target"),
        }
    }
}

impl FromStr for RunsOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node_instance" => Ok(RunsOn::NodeInstance),
            "source" => Ok(RunsOn::Source),
            "target" => Ok(RunsOn::Target),
            other => Err(format!("unknown runs_on value '{}'", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Started => write!(f, "started"),
            TaskStatus::Retrying => write!(f, "retrying"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "started" => Ok(TaskStatus::Started),
            "retrying" => Ok(TaskStatus::Retrying),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Started => write!(f, "started"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "started" => Ok(ExecutionStatus::Started),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_membership() {
        let node = Node::new("web", "WebServer").with_type_hierarchy(vec![
            "WebServer".to_string(),
            "SoftwareComponent".to_string(),
            "Root".to_string(),
        ]);

        assert!(node.is_of_type("WebServer"));
        assert!(node.is_of_type("Root"));
        assert!(!node.is_of_type("Database"));
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Started,
            TaskStatus::Retrying,
            TaskStatus::Success,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }

        assert!("bogus".parse::<RunsOn>().is_err());
    }

    #[test]
    fn test_new_instances_start_at_initial_version() {
        let instance = NodeInstance::new("web_1", "web");
        assert_eq!(instance.version, INITIAL_VERSION);
        assert!(instance.runtime_properties.is_empty());
    }
}
