// ABOUTME: Per-task operation context handed to an operation when it runs
// ABOUTME: Gives access to the acting node or relationship instance through its own storage handles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::error::{ContextError, Result};
use crate::model::{NodeInstance, RelationshipInstance};
use crate::storage::{ModelStorage, ResourceStorage};

/// Which kind of actor an operation context is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    NodeOperation,
    RelationshipOperation,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::NodeOperation => write!(f, "node operation"),
            ContextKind::RelationshipOperation => write!(f, "relationship operation"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    pub name: String,
    pub deployment_id: String,
    pub execution_id: String,
    pub task_id: String,
    pub actor_id: String,
    pub workdir: Option<PathBuf>,
    pub kind: ContextKind,
    pub model: Option<ModelStorage>,
    pub resource: Option<ResourceStorage>,
}

impl OperationContext {
    pub fn model(&self) -> Result<&ModelStorage> {
        self.model.as_ref().ok_or(ContextError::MissingModelStorage)
    }

    pub fn resource(&self) -> Result<&ResourceStorage> {
        self.resource
            .as_ref()
            .ok_or(ContextError::MissingResourceStorage)
    }

    /// Fresh read of the node instance this context acts on
    pub async fn node_instance(&self) -> Result<NodeInstance> {
        if self.kind != ContextKind::NodeOperation {
            return Err(ContextError::WrongActorKind {
                context: "relationship operation",
                requested: "node instance",
            });
        }
        Ok(self.model()?.node_instances().get(&self.actor_id).await?)
    }

    /// Fresh read of the relationship instance this context acts on
    pub async fn relationship_instance(&self) -> Result<RelationshipInstance> {
        if self.kind != ContextKind::RelationshipOperation {
            return Err(ContextError::WrongActorKind {
                context: "node operation",
                requested: "relationship instance",
            });
        }
        Ok(self
            .model()?
            .relationship_instances()
            .get(&self.actor_id)
            .await?)
    }

    /// Release storage connections held by this context
    pub async fn close(&self) {
        if let Some(model) = &self.model {
            model.close().await;
        }
    }
}
