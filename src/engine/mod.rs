// ABOUTME: Workflow execution engine: graph driver, executors, retry policy and lifecycle signals
// ABOUTME: Operation attempts run through a TaskExecutor, by default one worker process per attempt

pub mod error;
pub mod events;
pub mod executor;
pub mod process;
pub mod recorder;
pub mod result;
pub mod scheduler;
pub mod workflow;

pub use error::{EngineError, Result};
pub use events::{SignalBus, TaskEvent, TaskEventHandler, TaskEventKind};
pub use executor::{InProcessExecutor, TaskExecutor};
pub use process::ProcessExecutor;
pub use recorder::TaskRecorder;
pub use result::{ExecutionReport, ExecutionSummary, TaskReport};
pub use scheduler::{TaskOutcome, TaskScheduler};
pub use workflow::{run_workflow, WorkflowEngine};
