// ABOUTME: Signal subscriber that persists task records to model storage
// ABOUTME: Storage failures are logged and never interrupt the workflow

use async_trait::async_trait;
use tracing::warn;

use super::events::{TaskEvent, TaskEventHandler};
use crate::storage::ModelStorage;

pub struct TaskRecorder {
    model: ModelStorage,
}

impl TaskRecorder {
    pub fn new(model: ModelStorage) -> Self {
        Self { model }
    }
}

#[async_trait]
impl TaskEventHandler for TaskRecorder {
    async fn handle(&self, event: &TaskEvent) {
        if let Err(e) = self.model.tasks().upsert(&event.to_record()).await {
            warn!(
                "Failed to record {} event for task {}: {}",
                event.kind, event.task_name, e
            );
        }
    }
}
