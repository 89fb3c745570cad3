// ABOUTME: Task types that populate a task graph: operation tasks, sub-workflow tasks and stubs
// ABOUTME: Operation tasks are resolved from node or relationship templates at construction time

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::error::{TaskCreationError, WorkflowError};
use super::graph::{GraphApi, TaskGraph};
use crate::context::WorkflowContext;
use crate::model::{
    NodeInstance, OperationSpec, PluginSpec, Properties, RelationshipInstance, RunsOn, Topology,
};

pub type TaskId = String;

fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

/// Upper bound on attempts for an operation task
///
/// Serialized as a positive integer or the string `"infinite"`; `-1` is also
/// accepted for infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MaxAttemptsRepr", into = "MaxAttemptsRepr")]
pub enum MaxAttempts {
    Limited(u32),
    Infinite,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MaxAttemptsRepr {
    Count(i64),
    Word(String),
}

impl Default for MaxAttempts {
    fn default() -> Self {
        MaxAttempts::Limited(1)
    }
}

impl MaxAttempts {
    pub fn new(attempts: u32) -> Result<Self, TaskCreationError> {
        if attempts == 0 {
            return Err(TaskCreationError::InvalidMaxAttempts);
        }
        Ok(MaxAttempts::Limited(attempts))
    }

    /// Whether another attempt may follow `attempts_made` failed ones
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        match self {
            MaxAttempts::Limited(max) => attempts_made < *max,
            MaxAttempts::Infinite => true,
        }
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            MaxAttempts::Limited(max) => Some(*max),
            MaxAttempts::Infinite => None,
        }
    }
}

impl TryFrom<MaxAttemptsRepr> for MaxAttempts {
    type Error = String;

    fn try_from(repr: MaxAttemptsRepr) -> Result<Self, Self::Error> {
        match repr {
            MaxAttemptsRepr::Count(-1) => Ok(MaxAttempts::Infinite),
            MaxAttemptsRepr::Count(n) if n >= 1 && n <= i64::from(u32::MAX) => {
                Ok(MaxAttempts::Limited(n as u32))
            }
            MaxAttemptsRepr::Count(n) => Err(format!(
                "max_attempts must be at least 1 or -1 for infinite, got {}",
                n
            )),
            MaxAttemptsRepr::Word(word) if word.eq_ignore_ascii_case("infinite") => {
                Ok(MaxAttempts::Infinite)
            }
            MaxAttemptsRepr::Word(word) => Err(format!("invalid max_attempts '{}'", word)),
        }
    }
}

impl From<MaxAttempts> for MaxAttemptsRepr {
    fn from(value: MaxAttempts) -> Self {
        match value {
            MaxAttempts::Limited(max) => MaxAttemptsRepr::Count(i64::from(max)),
            MaxAttempts::Infinite => MaxAttemptsRepr::Word("infinite".to_string()),
        }
    }
}

/// Command-line and environment form: a positive count, `-1` or `infinite`
impl FromStr for MaxAttempts {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.parse::<i64>() {
            Ok(count) => MaxAttemptsRepr::Count(count).try_into(),
            Err(_) => MaxAttemptsRepr::Word(s.to_string()).try_into(),
        }
    }
}

impl fmt::Display for MaxAttempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxAttempts::Limited(max) => write!(f, "{}", max),
            MaxAttempts::Infinite => write!(f, "infinite"),
        }
    }
}

/// The entity an operation task acts on
#[derive(Debug, Clone, PartialEq)]
pub enum Actor {
    NodeInstance(NodeInstance),
    RelationshipInstance(RelationshipInstance),
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::NodeInstance(instance) => &instance.id,
            Actor::RelationshipInstance(instance) => &instance.id,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::NodeInstance(instance) => write!(f, "node instance {}", instance.name),
            Actor::RelationshipInstance(instance) => {
                write!(f, "relationship instance {}", instance.id)
            }
        }
    }
}

/// Which operations table of a relationship template to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationEnd {
    Source,
    Target,
}

impl OperationEnd {
    pub fn runs_on(&self) -> RunsOn {
        match self {
            OperationEnd::Source => RunsOn::Source,
            OperationEnd::Target => RunsOn::Target,
        }
    }
}

impl FromStr for OperationEnd {
    type Err = TaskCreationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source_operations" => Ok(OperationEnd::Source),
            "target_operations" => Ok(OperationEnd::Target),
            other => Err(TaskCreationError::InvalidOperationEnd {
                end: other.to_string(),
            }),
        }
    }
}

/// A single operation to run on one actor, with its retry policy
#[derive(Debug, Clone)]
pub struct OperationTask {
    pub id: TaskId,
    pub name: String,
    pub context: Arc<WorkflowContext>,
    pub actor: Actor,
    pub operation_mapping: String,
    pub inputs: Properties,
    pub plugin: Option<PluginSpec>,
    pub runs_on: RunsOn,
    pub max_attempts: MaxAttempts,
    pub retry_interval: Duration,
    pub ignore_failure: bool,
}

impl OperationTask {
    /// Build a task running `operation` from the instance's node template
    pub fn node_instance(
        ctx: &Arc<WorkflowContext>,
        topology: &Topology,
        instance: &NodeInstance,
        operation: &str,
        inputs: Properties,
    ) -> Result<Self, WorkflowError> {
        let node = topology
            .node_of(instance)
            .ok_or_else(|| WorkflowError::UnknownNode(instance.id.clone()))?;
        let actor = Actor::NodeInstance(instance.clone());

        let spec = node
            .operations
            .get(operation)
            .ok_or_else(|| WorkflowError::OperationNotFound {
                operation: operation.to_string(),
                actor: actor.to_string(),
            })?;
        let plugin = resolve_plugin(spec, &node.plugins);

        Self::build(
            ctx,
            operation,
            actor,
            spec,
            plugin,
            RunsOn::NodeInstance,
            inputs,
        )
    }

    /// Build a task running `operation` from one end of the instance's relationship template
    ///
    /// `end` must be `"source_operations"` or `"target_operations"`; it picks the
    /// operations table, the node whose plugins are searched, and where the task runs.
    pub fn relationship_instance(
        ctx: &Arc<WorkflowContext>,
        topology: &Topology,
        instance: &RelationshipInstance,
        operation: &str,
        end: &str,
        inputs: Properties,
    ) -> Result<Self, WorkflowError> {
        let end: OperationEnd = end.parse()?;
        let relationship = topology
            .relationship_of(instance)
            .ok_or_else(|| WorkflowError::UnknownRelationship(instance.id.clone()))?;
        let actor = Actor::RelationshipInstance(instance.clone());

        let (operations, plugin_node_id) = match end {
            OperationEnd::Source => (
                &relationship.source_operations,
                &relationship.source_node_id,
            ),
            OperationEnd::Target => (
                &relationship.target_operations,
                &relationship.target_node_id,
            ),
        };

        let spec = operations
            .get(operation)
            .ok_or_else(|| WorkflowError::OperationNotFound {
                operation: operation.to_string(),
                actor: actor.to_string(),
            })?;
        let plugins = topology
            .node(plugin_node_id)
            .map(|node| node.plugins.as_slice())
            .unwrap_or_default();
        let plugin = resolve_plugin(spec, plugins);

        Self::build(ctx, operation, actor, spec, plugin, end.runs_on(), inputs)
    }

    fn build(
        ctx: &Arc<WorkflowContext>,
        operation: &str,
        actor: Actor,
        spec: &OperationSpec,
        plugin: Option<PluginSpec>,
        runs_on: RunsOn,
        inputs: Properties,
    ) -> Result<Self, WorkflowError> {
        let mapping = spec
            .operation
            .clone()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| TaskCreationError::MissingMapping {
                operation: operation.to_string(),
            })?;
        match mapping.rsplit_once('.') {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => {}
            _ => return Err(TaskCreationError::InvalidMapping { mapping }.into()),
        }

        let mut merged = Properties::new();
        for (name, parameter) in &spec.inputs {
            let value = parameter
                .cast_value()
                .map_err(|source| TaskCreationError::InvalidInput {
                    name: name.clone(),
                    source,
                })?;
            if let Some(value) = value {
                merged.insert(name.clone(), value);
            }
        }
        merged.extend(inputs);

        let defaults = &ctx.defaults;
        Ok(Self {
            id: new_task_id(),
            name: format!("{}.{}", operation, actor.id()),
            context: Arc::clone(ctx),
            actor,
            operation_mapping: mapping,
            inputs: merged,
            plugin,
            runs_on,
            max_attempts: defaults.max_attempts,
            retry_interval: defaults.retry_interval,
            ignore_failure: defaults.ignore_failure,
        })
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Result<Self, TaskCreationError> {
        self.max_attempts = MaxAttempts::new(attempts)?;
        Ok(self)
    }

    pub fn with_infinite_retries(mut self) -> Self {
        self.max_attempts = MaxAttempts::Infinite;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_ignore_failure(mut self, ignore_failure: bool) -> Self {
        self.ignore_failure = ignore_failure;
        self
    }
}

fn resolve_plugin(spec: &OperationSpec, plugins: &[PluginSpec]) -> Option<PluginSpec> {
    let name = spec.plugin.as_deref()?;
    plugins.iter().find(|p| p.name == name).cloned()
}

/// No-op graph node used to join or fan out dependencies
#[derive(Debug, Clone)]
pub struct StubTask {
    pub id: TaskId,
    pub name: String,
    pub context: Arc<WorkflowContext>,
}

impl StubTask {
    pub fn new(ctx: &Arc<WorkflowContext>) -> Self {
        let id = new_task_id();
        Self {
            name: format!("stub.{}", id),
            id,
            context: Arc::clone(ctx),
        }
    }
}

/// A sub-workflow whose nested graph runs as a single node of the parent graph
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub id: TaskId,
    pub name: String,
    pub context: Arc<WorkflowContext>,
    graph: TaskGraph,
}

impl WorkflowTask {
    /// Run `builder` against a fresh graph and a child context named `name`
    pub fn new<F>(
        ctx: &Arc<WorkflowContext>,
        name: impl Into<String>,
        builder: F,
    ) -> Result<Self, WorkflowError>
    where
        F: FnOnce(&Arc<WorkflowContext>, &mut TaskGraph) -> Result<(), WorkflowError>,
    {
        let name = name.into();
        let child = ctx.nested(name.clone());
        let mut graph = TaskGraph::new(name.clone());
        builder(&child, &mut graph)?;

        Ok(Self {
            id: new_task_id(),
            name,
            context: child,
            graph,
        })
    }
}

impl GraphApi for WorkflowTask {
    fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }
}

#[derive(Debug, Clone)]
pub enum Task {
    Operation(OperationTask),
    Workflow(WorkflowTask),
    Stub(StubTask),
}

impl Task {
    pub fn id(&self) -> &str {
        match self {
            Task::Operation(task) => &task.id,
            Task::Workflow(task) => &task.id,
            Task::Stub(task) => &task.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Task::Operation(task) => &task.name,
            Task::Workflow(task) => &task.name,
            Task::Stub(task) => &task.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Task::Operation(_) => "operation",
            Task::Workflow(_) => "workflow",
            Task::Stub(_) => "stub",
        }
    }

    pub fn as_operation(&self) -> Option<&OperationTask> {
        match self {
            Task::Operation(task) => Some(task),
            _ => None,
        }
    }
}

impl From<OperationTask> for Task {
    fn from(task: OperationTask) -> Self {
        Task::Operation(task)
    }
}

impl From<WorkflowTask> for Task {
    fn from(task: WorkflowTask) -> Self {
        Task::Workflow(task)
    }
}

impl From<StubTask> for Task {
    fn from(task: StubTask) -> Self {
        Task::Stub(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts_rejects_zero() {
        assert!(matches!(
            MaxAttempts::new(0),
            Err(TaskCreationError::InvalidMaxAttempts)
        ));
        assert_eq!(MaxAttempts::new(3).unwrap(), MaxAttempts::Limited(3));
    }

    #[test]
    fn test_max_attempts_retry_accounting() {
        let three = MaxAttempts::Limited(3);
        assert!(three.allows_retry(1));
        assert!(three.allows_retry(2));
        assert!(!three.allows_retry(3));
        assert!(MaxAttempts::Infinite.allows_retry(1_000));
    }

    #[test]
    fn test_max_attempts_serde_forms() {
        let parsed: MaxAttempts = serde_yaml::from_str("infinite").unwrap();
        assert_eq!(parsed, MaxAttempts::Infinite);
        let parsed: MaxAttempts = serde_yaml::from_str("-1").unwrap();
        assert_eq!(parsed, MaxAttempts::Infinite);
        let parsed: MaxAttempts = serde_yaml::from_str("4").unwrap();
        assert_eq!(parsed, MaxAttempts::Limited(4));
        assert!(serde_yaml::from_str::<MaxAttempts>("0").is_err());

        assert_eq!(
            serde_json::to_string(&MaxAttempts::Limited(2)).unwrap(),
            "2"
        );
    }

    #[test]
    fn test_max_attempts_from_str() {
        assert_eq!("3".parse::<MaxAttempts>(), Ok(MaxAttempts::Limited(3)));
        assert_eq!("-1".parse::<MaxAttempts>(), Ok(MaxAttempts::Infinite));
        assert_eq!("Infinite".parse::<MaxAttempts>(), Ok(MaxAttempts::Infinite));
        assert!("0".parse::<MaxAttempts>().is_err());
        assert!("-2".parse::<MaxAttempts>().is_err());
        assert!("often".parse::<MaxAttempts>().is_err());
    }

    #[test]
    fn test_operation_end_parsing() {
        assert_eq!(
            "source_operations".parse::<OperationEnd>().unwrap(),
            OperationEnd::Source
        );
        assert_eq!(
            "target_operations".parse::<OperationEnd>().unwrap().runs_on(),
            RunsOn::Target
        );
        assert!(matches!(
            "middle_operations".parse::<OperationEnd>(),
            Err(TaskCreationError::InvalidOperationEnd { end }) if end == "middle_operations"
        ));
    }
}
