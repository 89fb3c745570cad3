// ABOUTME: Command implementations for the conductor CLI
// ABOUTME: Handles the worker entry point, model database setup and the execute-operation workflow

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::args::{Args, ExecuteOperationArgs};
use super::config::Config;
use crate::context::{WorkflowContext, WorkflowContextOptions};
use crate::engine::{
    run_workflow, InProcessExecutor, ProcessExecutor, TaskExecutor, TaskRecorder, WorkflowEngine,
};
use crate::model::{Deployment, TopologyDocument};
use crate::operations::OperationRegistry;
use crate::storage::{ModelStorage, ResourceStorage, StorageError};
use crate::workflows::builtin::execute_operation::{
    execute_operation as build_execute_operation, ExecuteOperationParams, WORKFLOW_NAME,
};

/// Run one operation attempt from a request on stdin
pub async fn worker() -> Result<()> {
    crate::worker::run(&OperationRegistry::with_builtins())
        .await
        .context("Worker failed to exchange request and outcome")
}

/// Create the model database and optionally load a topology file
pub async fn init_db(db: PathBuf, topology: Option<PathBuf>) -> Result<()> {
    let model = ModelStorage::sqlite(&db)
        .await
        .with_context(|| format!("Failed to open model database {}", db.display()))?;
    info!("Model database ready: {}", db.display());

    if let Some(path) = topology {
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read topology {}", path.display()))?;
        let document: TopologyDocument = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid topology {}", path.display()))?;

        let deployment = model.put_topology(&document).await?;
        println!(
            "Deployment '{}' loaded with id {} ({} node instances)",
            deployment.name,
            deployment.id,
            document.topology.node_instances.len()
        );
    }

    model.close().await;
    Ok(())
}

async fn find_deployment(model: &ModelStorage, id_or_name: &str) -> Result<Deployment> {
    match model.deployments().get(id_or_name).await {
        Ok(deployment) => Ok(deployment),
        Err(StorageError::NotFound { .. }) => model
            .deployments()
            .get_by_name(id_or_name)
            .await
            .with_context(|| format!("Unknown deployment '{}'", id_or_name)),
        Err(e) => Err(e.into()),
    }
}

fn build_executor(
    options: &ExecuteOperationArgs,
    config: &Config,
) -> Result<Arc<dyn TaskExecutor>> {
    if options.in_process {
        return Ok(Arc::new(InProcessExecutor::new(
            OperationRegistry::with_builtins(),
        )));
    }

    let executor = match &config.worker_program {
        Some(program) => ProcessExecutor::new(program),
        None => ProcessExecutor::current_exe().context("Cannot locate the conductor binary")?,
    };
    Ok(Arc::new(executor))
}

/// Run the builtin execute_operation workflow against a stored deployment
pub async fn execute_operation(options: ExecuteOperationArgs, config: &Config) -> Result<()> {
    let model = ModelStorage::sqlite(&options.db)
        .await
        .with_context(|| format!("Failed to open model database {}", options.db.display()))?;
    let resource = match &options.resources {
        Some(directory) => Some(ResourceStorage::filesystem(directory).await?),
        None => None,
    };
    let deployment = find_deployment(&model, &options.deployment).await?;

    let mut defaults = config.task_defaults.clone();
    if let Some(attempts) = options.max_attempts {
        defaults.max_attempts = attempts;
    }
    if let Some(interval) = options.retry_interval {
        defaults.retry_interval = interval;
    }
    if options.ignore_failure {
        defaults.ignore_failure = true;
    }

    let params = ExecuteOperationParams {
        operation: options.operation.clone(),
        operation_kwargs: Args::parse_inputs(&options.inputs)?,
        allow_kwargs_override: options.allow_kwargs_override,
        run_by_dependency_order: options.dependency_order,
        type_names: options.type_names.clone(),
        node_ids: options.node_ids.clone(),
        node_instance_ids: options.node_instance_ids.clone(),
    };

    let mut context_options = WorkflowContextOptions::new(WORKFLOW_NAME, &deployment.id)
        .with_defaults(defaults)
        .with_parameters(match serde_json::to_value(&params)? {
            serde_json::Value::Object(map) => map,
            _ => Default::default(),
        });
    if let Some(workdir) = &config.workdir {
        context_options = context_options.with_workdir(workdir);
    }
    let ctx = WorkflowContext::create(context_options, model.clone(), resource).await?;
    let topology = ctx.topology().await?;

    let mut engine = WorkflowEngine::new(build_executor(&options, config)?)
        .with_max_concurrent(options.max_concurrent.unwrap_or(config.max_concurrent_tasks));
    if let Some(task_timeout) = config.task_timeout {
        engine = engine.with_task_timeout(task_timeout);
    }
    engine
        .signals()
        .subscribe(Arc::new(TaskRecorder::new(model.clone())));

    info!(
        "Execution {}: running '{}' on deployment {}",
        ctx.execution_id, options.operation, deployment.name
    );

    let result = run_workflow(&engine, &ctx, |ctx, graph| {
        build_execute_operation(ctx, &topology, graph, &params).map(|_| ())
    })
    .await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            model.close().await;
            return Err(anyhow::anyhow!("Execution {} failed: {}", ctx.execution_id, e));
        }
    };

    if let Some(output_path) = &options.output {
        let json_content = serde_json::to_string_pretty(&report)
            .context("Failed to serialize execution report")?;
        std::fs::write(output_path, json_content).with_context(|| {
            format!("Failed to write output file '{}'", output_path.display())
        })?;
        info!("Report written to: {}", output_path.display());
    }

    println!(
        "Execution {} succeeded: {}/{} tasks, {} attempts",
        ctx.execution_id,
        report.summary.successful_tasks,
        report.summary.total_tasks,
        report.summary.total_attempts
    );
    for task in &report.tasks {
        println!("  {}: {} ({} attempts)", task.name, task.status, task.attempts);
        if let Some(error) = &task.error {
            warn!("{} failed and was ignored: {}", task.name, error);
        }
    }

    model.close().await;
    Ok(())
}

/// Print every operation mapping the worker can resolve
pub fn list_operations() -> Result<()> {
    let registry = OperationRegistry::with_builtins();
    for mapping in registry.list_mappings() {
        println!("{}", mapping);
    }
    Ok(())
}
