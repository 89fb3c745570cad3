// ABOUTME: Builtin workflows shipped with the engine
// ABOUTME: Each builtin populates a task graph from a workflow context and a topology snapshot

pub mod execute_operation;

pub use execute_operation::{execute_operation, filter_node_instances, ExecuteOperationParams};
