// ABOUTME: Workflow context shared by every task built for one execution
// ABOUTME: Holds task retry defaults, storage handles and the execution record it created

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::error::{ContextError, Result};
use super::operation::{ContextKind, OperationContext};
use crate::model::{Execution, Properties, Topology};
use crate::storage::{ModelStorage, ResourceStorage, StorageError};
use crate::workflows::task::{Actor, MaxAttempts, OperationTask};

/// Retry policy applied to operation tasks that do not override it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefaults {
    #[serde(default)]
    pub max_attempts: MaxAttempts,
    #[serde(default, with = "humantime_serde")]
    pub retry_interval: Duration,
    #[serde(default)]
    pub ignore_failure: bool,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            max_attempts: MaxAttempts::default(),
            retry_interval: Duration::ZERO,
            ignore_failure: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowContextOptions {
    pub name: String,
    pub workflow_name: String,
    pub deployment_id: String,
    pub workdir: Option<PathBuf>,
    pub defaults: TaskDefaults,
    pub parameters: Properties,
}

impl WorkflowContextOptions {
    pub fn new(workflow_name: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        let workflow_name = workflow_name.into();
        Self {
            name: workflow_name.clone(),
            workflow_name,
            deployment_id: deployment_id.into(),
            workdir: None,
            defaults: TaskDefaults::default(),
            parameters: Properties::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: TaskDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Properties) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug)]
pub struct WorkflowContext {
    pub name: String,
    pub workflow_name: String,
    pub deployment_id: String,
    pub execution_id: String,
    pub workdir: Option<PathBuf>,
    pub defaults: TaskDefaults,
    pub parameters: Properties,
    model: ModelStorage,
    resource: Option<ResourceStorage>,
}

impl WorkflowContext {
    /// Create a context and the pending execution record it belongs to
    pub async fn create(
        options: WorkflowContextOptions,
        model: ModelStorage,
        resource: Option<ResourceStorage>,
    ) -> Result<Arc<Self>> {
        model
            .deployments()
            .get(&options.deployment_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => {
                    ContextError::DeploymentNotFound(options.deployment_id.clone())
                }
                other => ContextError::Storage(other),
            })?;

        let mut execution = Execution::new(&options.deployment_id, &options.workflow_name);
        execution.parameters = options.parameters.clone();
        model.executions().put(&execution).await?;

        info!(
            "Created execution {} of workflow '{}' for deployment {}",
            execution.id, options.workflow_name, options.deployment_id
        );

        Ok(Arc::new(Self {
            name: options.name,
            workflow_name: options.workflow_name,
            deployment_id: options.deployment_id,
            execution_id: execution.id,
            workdir: options.workdir,
            defaults: options.defaults,
            parameters: options.parameters,
            model,
            resource,
        }))
    }

    /// Child context for a sub-workflow; shares the execution and storage
    pub fn nested(&self, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            workflow_name: self.workflow_name.clone(),
            deployment_id: self.deployment_id.clone(),
            execution_id: self.execution_id.clone(),
            workdir: self.workdir.clone(),
            defaults: self.defaults.clone(),
            parameters: self.parameters.clone(),
            model: self.model.clone(),
            resource: self.resource.clone(),
        })
    }

    pub fn model(&self) -> &ModelStorage {
        &self.model
    }

    pub fn resource(&self) -> Option<&ResourceStorage> {
        self.resource.as_ref()
    }

    pub async fn topology(&self) -> Result<Topology> {
        Ok(self.model.topology(&self.deployment_id).await?)
    }

    pub async fn execution(&self) -> Result<Execution> {
        Ok(self.model.executions().get(&self.execution_id).await?)
    }

    /// Operation context for dispatching one attempt of `task`
    pub fn operation_context(&self, task: &OperationTask) -> OperationContext {
        let kind = match task.actor {
            Actor::NodeInstance(_) => ContextKind::NodeOperation,
            Actor::RelationshipInstance(_) => ContextKind::RelationshipOperation,
        };

        OperationContext {
            name: task.name.clone(),
            deployment_id: self.deployment_id.clone(),
            execution_id: self.execution_id.clone(),
            task_id: task.id.clone(),
            actor_id: task.actor.id().to_string(),
            workdir: self.workdir.clone(),
            kind,
            model: Some(self.model.clone()),
            resource: self.resource.clone(),
        }
    }
}
