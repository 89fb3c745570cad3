// ABOUTME: Operation trait and the registry that resolves "module.function" mappings to implementations
// ABOUTME: The worker process looks operations up here before running them against a rebuilt context

pub mod builtin;
pub mod error;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::context::OperationContext;
use crate::model::Properties;

pub use error::{FailureKind, OperationError, OperationFailure};

#[async_trait]
pub trait Operation: Send + Sync {
    async fn run(&self, ctx: &OperationContext, inputs: &Properties)
        -> Result<(), OperationError>;
}

/// Adapter turning an async closure over owned arguments into an `Operation`
struct FnOperation<F> {
    function: F,
}

#[async_trait]
impl<F, Fut> Operation for FnOperation<F>
where
    F: Fn(OperationContext, Properties) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    async fn run(
        &self,
        ctx: &OperationContext,
        inputs: &Properties,
    ) -> Result<(), OperationError> {
        (self.function)(ctx.clone(), inputs.clone()).await
    }
}

#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `conductor.builtin.*` operations
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, mapping: impl Into<String>, operation: Arc<dyn Operation>) {
        self.operations.insert(mapping.into(), operation);
    }

    pub fn register_fn<F, Fut>(&mut self, mapping: impl Into<String>, function: F)
    where
        F: Fn(OperationContext, Properties) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        self.register(mapping, Arc::new(FnOperation { function }));
    }

    pub fn resolve(&self, mapping: &str) -> Result<Arc<dyn Operation>, OperationError> {
        self.operations
            .get(mapping)
            .cloned()
            .ok_or_else(|| OperationError::UnknownMapping(mapping.to_string()))
    }

    pub fn contains(&self, mapping: &str) -> bool {
        self.operations.contains_key(mapping)
    }

    pub fn list_mappings(&self) -> Vec<&str> {
        let mut mappings: Vec<&str> = self.operations.keys().map(|k| k.as_str()).collect();
        mappings.sort_unstable();
        mappings
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("mappings", &self.list_mappings())
            .finish()
    }
}
