// ABOUTME: Converts operation contexts to and from plain descriptors for crossing process boundaries
// ABOUTME: Storage handles travel as {api, connection} pairs and are reopened on the receiving side

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use super::error::SerializationError;
use super::operation::{ContextKind, OperationContext};
use crate::storage::{ModelStorage, ResourceStorage, StorageDescriptor};

/// Everything needed to rebuild an `OperationContext` in another process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDescriptor {
    pub kind: ContextKind,
    pub context: ContextFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFields {
    pub name: String,
    pub deployment_id: String,
    pub execution_id: String,
    pub task_id: String,
    pub actor_id: String,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub model_storage: Option<StorageDescriptor>,
    #[serde(default)]
    pub resource_storage: Option<StorageDescriptor>,
}

pub fn serialize(context: &OperationContext) -> ContextDescriptor {
    ContextDescriptor {
        kind: context.kind,
        context: ContextFields {
            name: context.name.clone(),
            deployment_id: context.deployment_id.clone(),
            execution_id: context.execution_id.clone(),
            task_id: context.task_id.clone(),
            actor_id: context.actor_id.clone(),
            workdir: context.workdir.clone(),
            model_storage: context.model.as_ref().map(|m| m.descriptor().clone()),
            resource_storage: context.resource.as_ref().map(|r| r.descriptor().clone()),
        },
    }
}

/// Rebuild a context, opening new storage handles from the transmitted parameters
pub async fn deserialize(
    descriptor: ContextDescriptor,
) -> Result<OperationContext, SerializationError> {
    let fields = descriptor.context;

    let model = match &fields.model_storage {
        Some(storage) => Some(ModelStorage::open_descriptor(storage).await?),
        None => None,
    };
    let resource = match &fields.resource_storage {
        Some(storage) => Some(ResourceStorage::open_descriptor(storage).await?),
        None => None,
    };

    debug!(
        "Rebuilt {} context for task {}",
        descriptor.kind, fields.task_id
    );

    Ok(OperationContext {
        name: fields.name,
        deployment_id: fields.deployment_id,
        execution_id: fields.execution_id,
        task_id: fields.task_id,
        actor_id: fields.actor_id,
        workdir: fields.workdir,
        kind: descriptor.kind,
        model,
        resource,
    })
}

/// Decode a descriptor from JSON and rebuild the context
pub async fn deserialize_json(raw: &str) -> Result<OperationContext, SerializationError> {
    let descriptor: ContextDescriptor = serde_json::from_str(raw)?;
    deserialize(descriptor).await
}
