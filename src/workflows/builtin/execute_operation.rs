// ABOUTME: Builtin workflow that runs one named operation across a filtered set of node instances
// ABOUTME: Optionally orders tasks by relationship dependencies, using stubs for unselected instances

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::WorkflowContext;
use crate::model::{NodeInstance, Properties, Topology};
use crate::workflows::error::{Result, WorkflowError};
use crate::workflows::graph::GraphApi;
use crate::workflows::task::{OperationTask, StubTask, TaskId};

pub const WORKFLOW_NAME: &str = "execute_operation";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOperationParams {
    pub operation: String,
    #[serde(default)]
    pub operation_kwargs: Properties,
    #[serde(default)]
    pub allow_kwargs_override: Option<bool>,
    #[serde(default)]
    pub run_by_dependency_order: bool,
    #[serde(default)]
    pub type_names: Vec<String>,
    #[serde(default)]
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub node_instance_ids: Vec<String>,
}

impl ExecuteOperationParams {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_kwargs(mut self, kwargs: Properties) -> Self {
        self.operation_kwargs = kwargs;
        self
    }

    pub fn with_dependency_order(mut self, ordered: bool) -> Self {
        self.run_by_dependency_order = ordered;
        self
    }

    pub fn with_type_names(mut self, type_names: Vec<String>) -> Self {
        self.type_names = type_names;
        self
    }

    pub fn with_node_ids(mut self, node_ids: Vec<String>) -> Self {
        self.node_ids = node_ids;
        self
    }

    pub fn with_node_instance_ids(mut self, node_instance_ids: Vec<String>) -> Self {
        self.node_instance_ids = node_instance_ids;
        self
    }
}

/// Instances matching every given criterion; an empty criterion matches all
///
/// Instance ids may be given as ids or instance names. A type name matches when
/// it appears anywhere in the node's type hierarchy.
pub fn filter_node_instances<'a>(
    topology: &'a Topology,
    params: &ExecuteOperationParams,
) -> Vec<&'a NodeInstance> {
    topology
        .node_instances
        .iter()
        .filter(|instance| {
            params.node_instance_ids.is_empty()
                || params
                    .node_instance_ids
                    .iter()
                    .any(|id| *id == instance.id || *id == instance.name)
        })
        .filter(|instance| {
            params.node_ids.is_empty() || params.node_ids.iter().any(|id| *id == instance.node_id)
        })
        .filter(|instance| {
            params.type_names.is_empty()
                || topology.node_of(instance).is_some_and(|node| {
                    params.type_names.iter().any(|t| node.is_of_type(t))
                })
        })
        .collect()
}

/// Populate `graph` with one operation task per selected instance
///
/// Returns the ids of the operation tasks that were added.
pub fn execute_operation<G: GraphApi>(
    ctx: &Arc<WorkflowContext>,
    topology: &Topology,
    graph: &mut G,
    params: &ExecuteOperationParams,
) -> Result<Vec<TaskId>> {
    let selected: Vec<&str> = filter_node_instances(topology, params)
        .into_iter()
        .map(|instance| instance.id.as_str())
        .collect();

    let mut inputs = params.operation_kwargs.clone();
    if let Some(allow) = params.allow_kwargs_override {
        inputs.insert("allow_kwargs_override".to_string(), json!(allow));
    }

    let mut instance_nodes: HashMap<&str, TaskId> = HashMap::new();
    let mut operation_tasks = Vec::new();

    for instance in &topology.node_instances {
        if selected.contains(&instance.id.as_str()) {
            let task = OperationTask::node_instance(
                ctx,
                topology,
                instance,
                &params.operation,
                inputs.clone(),
            )?;
            let id = graph.add_task(task)?;
            instance_nodes.insert(&instance.id, id.clone());
            operation_tasks.push(id);
        } else if params.run_by_dependency_order {
            let id = graph.add_task(StubTask::new(ctx))?;
            instance_nodes.insert(&instance.id, id);
        }
    }

    if params.run_by_dependency_order {
        for instance in &topology.node_instances {
            let Some(task) = instance_nodes.get(instance.id.as_str()) else {
                continue;
            };

            let targets = topology
                .outgoing_relationships(&instance.id)
                .map(|relationship| {
                    instance_nodes
                        .get(relationship.target_instance_id.as_str())
                        .cloned()
                        .ok_or_else(|| {
                            WorkflowError::UnknownInstance(relationship.target_instance_id.clone())
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            if !targets.is_empty() {
                debug!(
                    "{} waits on {} relationship targets",
                    instance.name,
                    targets.len()
                );
                graph.add_dependency(task, &targets)?;
            }
        }
    }

    info!(
        "execute_operation '{}': {} of {} instances selected",
        params.operation,
        operation_tasks.len(),
        topology.node_instances.len()
    );
    Ok(operation_tasks)
}
