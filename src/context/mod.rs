// ABOUTME: Workflow and operation contexts plus their cross-process serialization
// ABOUTME: Contexts are passed explicitly; nothing here is process-global

pub mod error;
pub mod operation;
pub mod serialization;
pub mod workflow;

pub use error::{ContextError, Result, SerializationError};
pub use operation::{ContextKind, OperationContext};
pub use serialization::{ContextDescriptor, ContextFields};
pub use workflow::{TaskDefaults, WorkflowContext, WorkflowContextOptions};
