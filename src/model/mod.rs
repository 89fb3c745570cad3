// ABOUTME: Entity model consumed by the orchestration core
// ABOUTME: Templates, instances, executions, task records and typed parameters

pub mod entities;
pub mod parameter;
pub mod topology;

pub use entities::{
    Deployment, Execution, ExecutionStatus, Node, NodeInstance, OperationSpec, PluginSpec,
    Properties, Relationship, RelationshipInstance, RunsOn, TaskRecord, TaskStatus,
    INITIAL_VERSION,
};
pub use parameter::{Parameter, ParameterError, ParameterType};
pub use topology::{Topology, TopologyDocument};
