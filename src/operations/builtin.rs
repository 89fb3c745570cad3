// ABOUTME: Builtin operations available to every worker under the conductor.builtin namespace
// ABOUTME: Covers no-op, forced failure, sleeping and version-checked runtime property/state writes

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Operation, OperationError, OperationRegistry};
use crate::context::{ContextKind, OperationContext};
use crate::model::Properties;
use crate::storage::StorageError;

pub const NOOP: &str = "conductor.builtin.noop";
pub const FAIL: &str = "conductor.builtin.fail";
pub const SLEEP: &str = "conductor.builtin.sleep";
pub const SET_RUNTIME_PROPERTY: &str = "conductor.builtin.set_runtime_property";
pub const SET_STATE: &str = "conductor.builtin.set_state";
pub const FLAKY: &str = "conductor.builtin.flaky";

/// Bound on refresh-and-retry rounds when `refresh_on_conflict` is set
const MAX_CONFLICT_ROUNDS: u32 = 20;

pub fn register_all(registry: &mut OperationRegistry) {
    registry.register(NOOP, Arc::new(Noop));
    registry.register(FAIL, Arc::new(Fail));
    registry.register(SLEEP, Arc::new(Sleep));
    registry.register(SET_RUNTIME_PROPERTY, Arc::new(SetRuntimeProperty));
    registry.register(SET_STATE, Arc::new(SetState));
    registry.register(FLAKY, Arc::new(Flaky));
}

fn required_str<'a>(inputs: &'a Properties, name: &str) -> Result<&'a str, OperationError> {
    match inputs.get(name) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => Err(OperationError::InvalidInput {
            name: name.to_string(),
            reason: format!("expected a string, got {}", other),
        }),
        None => Err(OperationError::MissingInput(name.to_string())),
    }
}

fn optional_bool(inputs: &Properties, name: &str) -> Result<bool, OperationError> {
    match inputs.get(name) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(value)) => Ok(*value),
        Some(other) => Err(OperationError::InvalidInput {
            name: name.to_string(),
            reason: format!("expected a boolean, got {}", other),
        }),
    }
}

fn optional_u64(inputs: &Properties, name: &str, default: u64) -> Result<u64, OperationError> {
    match inputs.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| OperationError::InvalidInput {
            name: name.to_string(),
            reason: format!("expected a non-negative integer, got {}", value),
        }),
    }
}

/// Read-modify-write of the context's actor runtime properties
///
/// A version conflict surfaces as an error unless `refresh_on_conflict` is set,
/// in which case the instance is re-read and the change re-applied.
async fn modify_runtime_properties<F>(
    ctx: &OperationContext,
    refresh_on_conflict: bool,
    mut apply: F,
) -> Result<(), OperationError>
where
    F: FnMut(&mut Properties, &mut Option<String>) + Send,
{
    let model = ctx.model()?;
    let mut round = 0;

    loop {
        round += 1;
        let result = match ctx.kind {
            ContextKind::NodeOperation => {
                let mut instance = ctx.node_instance().await?;
                let mut state = Some(instance.state.clone());
                apply(&mut instance.runtime_properties, &mut state);
                if let Some(state) = state {
                    instance.state = state;
                }
                model.node_instances().update(&mut instance).await
            }
            ContextKind::RelationshipOperation => {
                let mut instance = ctx.relationship_instance().await?;
                let mut state = None;
                apply(&mut instance.runtime_properties, &mut state);
                model.relationship_instances().update(&mut instance).await
            }
        };

        match result {
            Ok(()) => return Ok(()),
            Err(StorageError::VersionConflict { .. })
                if refresh_on_conflict && round < MAX_CONFLICT_ROUNDS =>
            {
                debug!("Version conflict on {}, refreshing (round {})", ctx.actor_id, round);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub struct Noop;

#[async_trait]
impl Operation for Noop {
    async fn run(
        &self,
        ctx: &OperationContext,
        _inputs: &Properties,
    ) -> Result<(), OperationError> {
        debug!("noop for {}", ctx.name);
        Ok(())
    }
}

/// Always fails with `message` (default "requested failure")
pub struct Fail;

#[async_trait]
impl Operation for Fail {
    async fn run(
        &self,
        _ctx: &OperationContext,
        inputs: &Properties,
    ) -> Result<(), OperationError> {
        let message = inputs
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(OperationError::Failed(message.to_string()))
    }
}

pub struct Sleep;

#[async_trait]
impl Operation for Sleep {
    async fn run(&self, ctx: &OperationContext, inputs: &Properties) -> Result<(), OperationError> {
        let millis = optional_u64(inputs, "duration_ms", 0)?;
        debug!("{} sleeping for {}ms", ctx.name, millis);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    }
}

/// Sets runtime property `key` to `value` on the acting instance
pub struct SetRuntimeProperty;

#[async_trait]
impl Operation for SetRuntimeProperty {
    async fn run(&self, ctx: &OperationContext, inputs: &Properties) -> Result<(), OperationError> {
        let key = required_str(inputs, "key")?.to_string();
        let value = inputs
            .get("value")
            .cloned()
            .ok_or_else(|| OperationError::MissingInput("value".to_string()))?;
        let refresh_on_conflict = optional_bool(inputs, "refresh_on_conflict")?;

        modify_runtime_properties(ctx, refresh_on_conflict, |properties, _| {
            properties.insert(key.clone(), value.clone());
        })
        .await?;

        info!("Set runtime property '{}' on {}", key, ctx.actor_id);
        Ok(())
    }
}

/// Moves the acting node instance to `state`
pub struct SetState;

#[async_trait]
impl Operation for SetState {
    async fn run(&self, ctx: &OperationContext, inputs: &Properties) -> Result<(), OperationError> {
        if ctx.kind != ContextKind::NodeOperation {
            return Err(OperationError::Failed(
                "set_state only applies to node instances".to_string(),
            ));
        }
        let state = required_str(inputs, "state")?.to_string();
        let refresh_on_conflict = optional_bool(inputs, "refresh_on_conflict")?;

        modify_runtime_properties(ctx, refresh_on_conflict, |_, current| {
            *current = Some(state.clone());
        })
        .await?;

        info!("{} is now {}", ctx.actor_id, state);
        Ok(())
    }
}

/// Counts its own runs in runtime property `counter` and fails until run number `succeed_on`
pub struct Flaky;

#[async_trait]
impl Operation for Flaky {
    async fn run(&self, ctx: &OperationContext, inputs: &Properties) -> Result<(), OperationError> {
        let counter = inputs
            .get("counter")
            .and_then(Value::as_str)
            .unwrap_or("flaky_runs")
            .to_string();
        let succeed_on = optional_u64(inputs, "succeed_on", 1)?;

        let mut runs = 0;
        modify_runtime_properties(ctx, true, |properties, _| {
            runs = properties.get(&counter).and_then(Value::as_u64).unwrap_or(0) + 1;
            properties.insert(counter.clone(), json!(runs));
        })
        .await?;

        if runs < succeed_on {
            warn!("{} failing on run {} of {}", ctx.name, runs, succeed_on);
            return Err(OperationError::Failed(format!(
                "flaky failure on run {}",
                runs
            )));
        }
        Ok(())
    }
}
